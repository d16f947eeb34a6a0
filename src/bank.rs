//! Bank reference data and the directory used for BIC resolution.

use crate::bic::{Bic, PRIMARY_OFFICE_BRANCH};
use crate::error::Result;
use csv::{ReaderBuilder, Trim};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::io::Read;

/// Jurisdictions that draw extra scrutiny.
pub const HIGH_RISK_COUNTRIES: &[&str] = &[
    "AF", "BY", "CF", "CU", "CD", "ER", "HT", "IR", "IQ", "KP", "LY", "ML", "MM", "RU", "SO",
    "SS", "SD", "SY", "VE", "YE",
];

/// Returns `true` if the country code is on the high-risk list.
pub fn is_high_risk_country(country: &str) -> bool {
    HIGH_RISK_COUNTRIES.contains(&country)
}

/// Geographic region of a bank.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Region {
    Europe,
    NorthAmerica,
    LatinAmerica,
    AsiaPacific,
    MiddleEastAfrica,
    Other,
}

impl Region {
    /// Derives a region from an ISO 3166 country code.
    pub fn from_country(country: &str) -> Self {
        match country {
            "US" | "CA" => Region::NorthAmerica,
            "MX" | "BR" | "AR" | "CL" | "CO" | "PE" | "EC" | "PA" | "SV" | "PR" | "VE" | "CU"
            | "HT" => Region::LatinAmerica,
            "JP" | "CN" | "HK" | "SG" | "KR" | "IN" | "AU" | "NZ" | "TH" | "MY" | "ID" | "PH"
            | "MM" | "KP" | "AF" => Region::AsiaPacific,
            "AE" | "SA" | "QA" | "KW" | "IL" | "TR" | "ZA" | "IR" | "IQ" | "SY" | "YE" | "LY"
            | "SD" | "SS" | "SO" | "ER" | "ML" | "CF" | "CD" => Region::MiddleEastAfrica,
            "GB" | "DE" | "FR" | "CH" | "LI" | "NL" | "BE" | "LU" | "AT" | "IT" | "ES" | "PT"
            | "IE" | "FI" | "SE" | "NO" | "DK" | "PL" | "CZ" | "HU" | "GR" | "EE" | "LV" | "LT"
            | "SK" | "SI" | "HR" | "MT" | "CY" | "RU" | "BY" => Region::Europe,
            _ => Region::Other,
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().replace('_', "-").as_str() {
            "europe" => Some(Region::Europe),
            "north-america" => Some(Region::NorthAmerica),
            "latin-america" => Some(Region::LatinAmerica),
            "asia-pacific" => Some(Region::AsiaPacific),
            "middle-east-africa" => Some(Region::MiddleEastAfrica),
            "other" => Some(Region::Other),
            _ => None,
        }
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Region::Europe => "europe",
            Region::NorthAmerica => "north-america",
            Region::LatinAmerica => "latin-america",
            Region::AsiaPacific => "asia-pacific",
            Region::MiddleEastAfrica => "middle-east-africa",
            Region::Other => "other",
        };
        f.write_str(name)
    }
}

/// A bank participating in the network.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Bank {
    pub bic: Bic,
    pub name: String,
    pub country: String,
    /// Static risk weight in `[0, 1]`.
    pub risk_weight: f64,
    pub region: Region,
}

impl Bank {
    /// Creates a bank, deriving country and region from the BIC.
    pub fn new(bic: Bic, name: impl Into<String>, risk_weight: f64) -> Self {
        let country = bic.country().to_string();
        let region = Region::from_country(&country);
        Bank {
            bic,
            name: name.into(),
            country,
            risk_weight: risk_weight.clamp(0.0, 1.0),
            region,
        }
    }

    /// Returns `true` if the bank's own risk weight is above 0.7.
    pub fn is_high_risk(&self) -> bool {
        self.risk_weight > 0.7
    }
}

/// Raw bank record as read from CSV.
#[derive(Debug, Deserialize)]
pub struct BankRecord {
    pub bic: String,
    pub name: String,
    pub country: Option<String>,
    pub risk_weight: f64,
    pub region: Option<String>,
}

impl BankRecord {
    /// Parses the raw CSV record into a typed bank.
    pub fn parse(&self) -> std::result::Result<Bank, String> {
        let bic = Bic::parse(self.bic.trim()).map_err(|e| e.to_string())?;

        if !(0.0..=1.0).contains(&self.risk_weight) {
            return Err(format!(
                "risk weight {} for {} is outside [0, 1]",
                self.risk_weight, bic
            ));
        }

        let country = match self.country.as_deref().map(str::trim) {
            Some(c) if !c.is_empty() => c.to_uppercase(),
            _ => bic.country().to_string(),
        };
        if country != bic.country() {
            return Err(format!(
                "country {} does not match BIC {} country segment",
                country, bic
            ));
        }

        let region = match self.region.as_deref().map(str::trim) {
            Some(r) if !r.is_empty() => {
                Region::parse(r).ok_or_else(|| format!("unknown region '{}'", r))?
            }
            _ => Region::from_country(&country),
        };

        Ok(Bank {
            bic,
            name: self.name.trim().to_string(),
            country,
            risk_weight: self.risk_weight,
            region,
        })
    }
}

/// Read-only lookup of banks by BIC.
///
/// Codes are stored in their 11-character form, so an 8-character BIC
/// resolves to the primary office (`XXX`) of its institution.
#[derive(Debug, Clone, Default)]
pub struct BankDirectory {
    banks: HashMap<String, Bank>,
    by_head: HashMap<String, Vec<String>>,
}

impl BankDirectory {
    /// Creates an empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a directory from banks, keeping the first entry for a duplicate BIC.
    pub fn from_banks(banks: impl IntoIterator<Item = Bank>) -> Self {
        let mut directory = Self::new();
        for bank in banks {
            if !directory.insert(bank) {
                warn!("Duplicate bank entry ignored");
            }
        }
        directory
    }

    /// Loads banks from CSV. Invalid rows are logged at warn level and skipped.
    pub fn from_csv<R: Read>(reader: R) -> Result<Self> {
        let mut csv_reader = ReaderBuilder::new()
            .trim(Trim::All)
            .flexible(true)
            .from_reader(reader);

        let mut directory = Self::new();
        for (row_idx, result) in csv_reader.deserialize::<BankRecord>().enumerate() {
            let row_num = row_idx + 2; // 1-indexed, accounting for header row

            match result {
                Ok(record) => match record.parse() {
                    Ok(bank) => {
                        let bic = bank.bic.clone();
                        if !directory.insert(bank) {
                            warn!("Row {}: Duplicate bank {}, ignoring", row_num, bic);
                        }
                    }
                    Err(e) => warn!("Row {}: Invalid bank record: {}", row_num, e),
                },
                Err(e) => warn!("Row {}: CSV parse error: {}", row_num, e),
            }
        }

        debug!("Loaded {} banks", directory.len());
        Ok(directory)
    }

    /// Adds a bank. Returns `false` if its BIC is already present.
    pub fn insert(&mut self, bank: Bank) -> bool {
        let full = bank.bic.to_full();
        let key = full.as_str().to_string();
        if self.banks.contains_key(&key) {
            return false;
        }
        self.by_head
            .entry(full.head().to_string())
            .or_default()
            .push(key.clone());
        self.banks.insert(key, bank);
        true
    }

    /// Looks up a bank by exact BIC; an 8-character code means the primary office.
    pub fn get(&self, code: &str) -> Option<&Bank> {
        match code.len() {
            11 => self.banks.get(code),
            8 => self.banks.get(&format!("{}{}", code, PRIMARY_OFFICE_BRANCH)),
            _ => None,
        }
    }

    /// Resolves a truncated or branch-less code to the single bank it can stand for.
    ///
    /// Returns `None` when zero or several banks match.
    pub fn complete(&self, partial: &str) -> Option<&Bank> {
        if partial.len() < 8 || partial.len() > 11 || !partial.is_ascii() {
            return None;
        }
        let candidates = self.by_head.get(&partial[0..8])?;
        let mut matching = candidates.iter().filter(|code| code.starts_with(partial));
        let first = matching.next()?;
        if matching.next().is_some() {
            return None;
        }
        self.banks.get(first)
    }

    pub fn len(&self) -> usize {
        self.banks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.banks.is_empty()
    }

    /// Banks sorted by BIC for deterministic output.
    pub fn banks(&self) -> Vec<&Bank> {
        let mut banks: Vec<_> = self.banks.values().collect();
        banks.sort_by(|a, b| a.bic.cmp(&b.bic));
        banks
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn bank(code: &str, risk: f64) -> Bank {
        Bank::new(Bic::parse(code).unwrap(), format!("{} Bank", code), risk)
    }

    #[test]
    fn test_eight_character_code_resolves_primary_office() {
        let directory = BankDirectory::from_banks([bank("CHASUS33", 0.2)]);
        assert!(directory.get("CHASUS33").is_some());
        assert!(directory.get("CHASUS33XXX").is_some());
        assert!(directory.get("CHASUS33ABC").is_none());
    }

    #[test]
    fn test_complete_unique_branch() {
        let directory = BankDirectory::from_banks([bank("DEUTDEFF500", 0.3)]);
        assert!(directory.get("DEUTDEFF").is_none());
        assert_eq!(
            directory.complete("DEUTDEFF").unwrap().bic.as_str(),
            "DEUTDEFF500"
        );
        assert_eq!(
            directory.complete("DEUTDEFF5").unwrap().bic.as_str(),
            "DEUTDEFF500"
        );
        assert!(directory.complete("DEUTDEFF6").is_none());
    }

    #[test]
    fn test_complete_is_ambiguous_with_several_branches() {
        let directory =
            BankDirectory::from_banks([bank("DEUTDEFF500", 0.3), bank("DEUTDEFF600", 0.3)]);
        assert!(directory.complete("DEUTDEFF").is_none());
        assert!(directory.complete("DEUTDEFF5").is_some());
    }

    #[test]
    fn test_duplicate_bic_keeps_first() {
        let mut directory = BankDirectory::new();
        assert!(directory.insert(bank("CHASUS33", 0.1)));
        assert!(!directory.insert(bank("CHASUS33XXX", 0.9)));
        assert_eq!(directory.len(), 1);
        assert_eq!(directory.get("CHASUS33").unwrap().risk_weight, 0.1);
    }

    #[test]
    fn test_from_csv_skips_invalid_rows() {
        let csv = "bic,name,country,risk_weight,region
CHASUS33XXX,Chase,US,0.2,
DEUTDEFF500,Deutsche,DE,0.35,europe
bad,Broken,US,0.2,
BARCGB22,Barclays,GB,1.5,
BNPAFRPP,BNP,DE,0.2,";

        let directory = BankDirectory::from_csv(Cursor::new(csv)).unwrap();
        assert_eq!(directory.len(), 2);
        let chase = directory.get("CHASUS33XXX").unwrap();
        assert_eq!(chase.region, Region::NorthAmerica);
        assert_eq!(chase.country, "US");
    }

    #[test]
    fn test_region_from_country() {
        assert_eq!(Region::from_country("DE"), Region::Europe);
        assert_eq!(Region::from_country("SG"), Region::AsiaPacific);
        assert_eq!(Region::from_country("ZZ"), Region::Other);
    }

    #[test]
    fn test_high_risk_country() {
        assert!(is_high_risk_country("IR"));
        assert!(!is_high_risk_country("GB"));
    }
}
