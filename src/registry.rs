//! Currency registry.
//!
//! Read-only snapshot of per-currency deposit rules. Refreshed out-of-band
//! by whoever owns currency configuration; the engine only reads it.

use rust_decimal::Decimal;
use rustc_hash::FxHashMap;

/// Deposit rules of one currency.
#[derive(Debug, Clone)]
pub struct CurrencyDetail {
    pub symbol: String,
    pub decimals: u32,
    pub min_deposit: Decimal,
    /// Chains addressing accounts by memo/destination tag set this; a
    /// deposit without a valid tag is recorded but never notified.
    pub requires_tag: bool,
    /// Token contract address, when the currency is not the chain's native
    /// coin.
    pub contract_address: Option<String>,
}

pub trait CurrencyRegistry: Send + Sync {
    /// Minimum accepted deposit for a currency.
    fn min_amount(&self, symbol: &str) -> Option<Decimal>;

    fn detail(&self, symbol: &str) -> Option<CurrencyDetail>;

    /// Currency owning a contract address, for token transfers.
    fn detail_by_address(&self, address: &str) -> Option<CurrencyDetail>;
}

/// Snapshot registry over a fixed currency table.
#[derive(Default)]
pub struct StaticCurrencyRegistry {
    by_symbol: FxHashMap<String, CurrencyDetail>,
    by_contract: FxHashMap<String, String>,
}

impl StaticCurrencyRegistry {
    pub fn new(currencies: Vec<CurrencyDetail>) -> Self {
        let mut by_symbol = FxHashMap::default();
        let mut by_contract = FxHashMap::default();
        for detail in currencies {
            if let Some(contract) = &detail.contract_address {
                by_contract.insert(contract.to_lowercase(), detail.symbol.clone());
            }
            by_symbol.insert(detail.symbol.clone(), detail);
        }
        Self {
            by_symbol,
            by_contract,
        }
    }
}

impl CurrencyRegistry for StaticCurrencyRegistry {
    fn min_amount(&self, symbol: &str) -> Option<Decimal> {
        self.by_symbol.get(symbol).map(|d| d.min_deposit)
    }

    fn detail(&self, symbol: &str) -> Option<CurrencyDetail> {
        self.by_symbol.get(symbol).cloned()
    }

    fn detail_by_address(&self, address: &str) -> Option<CurrencyDetail> {
        self.by_contract
            .get(&address.to_lowercase())
            .and_then(|symbol| self.by_symbol.get(symbol))
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> StaticCurrencyRegistry {
        StaticCurrencyRegistry::new(vec![
            CurrencyDetail {
                symbol: "ETH".to_string(),
                decimals: 18,
                min_deposit: Decimal::new(1, 2), // 0.01
                requires_tag: false,
                contract_address: None,
            },
            CurrencyDetail {
                symbol: "USDT".to_string(),
                decimals: 6,
                min_deposit: Decimal::new(1, 0),
                requires_tag: false,
                contract_address: Some("0xdAC17F958D2ee523a2206206994597C13D831ec7".to_string()),
            },
        ])
    }

    #[test]
    fn test_min_amount_lookup() {
        let registry = registry();
        assert_eq!(registry.min_amount("ETH"), Some(Decimal::new(1, 2)));
        assert_eq!(registry.min_amount("DOGE"), None);
    }

    #[test]
    fn test_contract_lookup_is_case_insensitive() {
        let registry = registry();
        let detail = registry
            .detail_by_address("0xdac17f958d2ee523a2206206994597c13d831ec7")
            .unwrap();
        assert_eq!(detail.symbol, "USDT");
        assert_eq!(detail.decimals, 6);
    }
}
