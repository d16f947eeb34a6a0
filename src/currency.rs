//! ISO 4217 currency codes known to the pipeline.

/// Currency codes accepted by validation.
pub const KNOWN_CURRENCIES: &[&str] = &[
    "USD", "EUR", "GBP", "JPY", "CHF", "CAD", "AUD", "NZD", "SEK", "NOK", "DKK", "PLN", "CZK",
    "HUF", "SGD", "HKD", "KRW", "CNY", "INR", "BRL", "MXN", "ZAR", "TRY", "THB", "MYR", "IDR",
    "PHP", "SAR", "AED", "QAR", "KWD", "ILS", "CLP", "COP", "PEN",
];

/// Euro-area member states.
const EURO_AREA: &[&str] = &[
    "AT", "BE", "CY", "DE", "EE", "ES", "FI", "FR", "GR", "HR", "IE", "IT", "LT", "LU", "LV",
    "MT", "NL", "PT", "SI", "SK",
];

/// Returns `true` if `code` is a known currency code.
pub fn is_known(code: &str) -> bool {
    KNOWN_CURRENCIES.contains(&code)
}

/// Returns `true` if `code` has the shape of an ISO 4217 code (three upper-case letters).
pub fn is_well_formed(code: &str) -> bool {
    code.len() == 3 && code.bytes().all(|b| b.is_ascii_uppercase())
}

/// Countries where the currency is the domestic currency.
///
/// Unknown currencies have no home countries.
pub fn home_countries(code: &str) -> &'static [&'static str] {
    match code {
        "EUR" => EURO_AREA,
        "USD" => &["US", "EC", "SV", "PA", "PR"],
        "GBP" => &["GB"],
        "JPY" => &["JP"],
        "CHF" => &["CH", "LI"],
        "CAD" => &["CA"],
        "AUD" => &["AU"],
        "NZD" => &["NZ"],
        "SEK" => &["SE"],
        "NOK" => &["NO"],
        "DKK" => &["DK"],
        "PLN" => &["PL"],
        "CZK" => &["CZ"],
        "HUF" => &["HU"],
        "SGD" => &["SG"],
        "HKD" => &["HK"],
        "KRW" => &["KR"],
        "CNY" => &["CN"],
        "INR" => &["IN"],
        "BRL" => &["BR"],
        "MXN" => &["MX"],
        "ZAR" => &["ZA"],
        "TRY" => &["TR"],
        "THB" => &["TH"],
        "MYR" => &["MY"],
        "IDR" => &["ID"],
        "PHP" => &["PH"],
        "SAR" => &["SA"],
        "AED" => &["AE"],
        "QAR" => &["QA"],
        "KWD" => &["KW"],
        "ILS" => &["IL"],
        "CLP" => &["CL"],
        "COP" => &["CO"],
        "PEN" => &["PE"],
        _ => &[],
    }
}

/// Returns `true` when neither party is domiciled where the currency is domestic.
///
/// USD and EUR are treated as vehicle currencies and never mismatch.
pub fn is_foreign_to(code: &str, sender_country: &str, receiver_country: &str) -> bool {
    if code == "USD" || code == "EUR" {
        return false;
    }
    let homes = home_countries(code);
    !homes.is_empty() && !homes.contains(&sender_country) && !homes.contains(&receiver_country)
}
