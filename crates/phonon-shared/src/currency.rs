use serde::Serialize;

use crate::denomination::Denomination;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Currency {
    pub name: &'static str,
    pub ticker: &'static str,
    pub decimals: u32,
}

/// Known currencies keyed by `CurrencyType`.
pub const CURRENCIES: &[(u16, Currency)] = &[
    (
        1,
        Currency {
            name: "Bitcoin",
            ticker: "BTC",
            decimals: 8,
        },
    ),
    (
        2,
        Currency {
            name: "Ether",
            ticker: "ETH",
            decimals: 18,
        },
    ),
    (
        3,
        Currency {
            name: "Matic",
            ticker: "MATIC",
            decimals: 18,
        },
    ),
];

pub fn currency_for(currency_type: u16) -> Option<&'static Currency> {
    CURRENCIES
        .iter()
        .find(|(id, _)| *id == currency_type)
        .map(|(_, currency)| currency)
}

/// Human-readable amount, falling back to raw base units for unknown currencies.
pub fn format_amount(denomination: &Denomination, currency_type: u16) -> String {
    match currency_for(currency_type) {
        Some(currency) => format!(
            "{} {}",
            denomination.to_display(currency.decimals),
            currency.ticker
        ),
        None => denomination.to_string(),
    }
}
