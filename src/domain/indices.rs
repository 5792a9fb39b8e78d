use serde::{Deserialize, Serialize};

/// Static contract parameters for a tradeable index.
#[derive(Debug, Clone, Serialize)]
pub struct IndexSpec {
    pub name: &'static str,
    pub display_name: &'static str,
    pub security_id: u32,
    pub exchange_segment: &'static str,
    pub fno_segment: &'static str,
    pub lot_size: i64,
    pub strike_interval: i64,
    pub expiry: ExpiryCycle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExpiryCycle {
    Weekly,
    Monthly,
}

pub const INDICES: [IndexSpec; 4] = [
    IndexSpec {
        name: "NIFTY",
        display_name: "NIFTY 50",
        security_id: 13,
        exchange_segment: "IDX_I",
        fno_segment: "NSE_FNO",
        lot_size: 65,
        strike_interval: 50,
        expiry: ExpiryCycle::Weekly,
    },
    IndexSpec {
        name: "BANKNIFTY",
        display_name: "BANK NIFTY",
        security_id: 25,
        exchange_segment: "IDX_I",
        fno_segment: "NSE_FNO",
        lot_size: 30,
        strike_interval: 100,
        expiry: ExpiryCycle::Monthly,
    },
    IndexSpec {
        name: "SENSEX",
        display_name: "SENSEX",
        security_id: 51,
        exchange_segment: "IDX_I",
        fno_segment: "BSE_FNO",
        lot_size: 20,
        strike_interval: 100,
        expiry: ExpiryCycle::Weekly,
    },
    IndexSpec {
        name: "FINNIFTY",
        display_name: "FINNIFTY",
        security_id: 27,
        exchange_segment: "IDX_I",
        fno_segment: "NSE_FNO",
        lot_size: 60,
        strike_interval: 50,
        expiry: ExpiryCycle::Monthly,
    },
];

/// Look up an index by name, case-insensitive. Unknown names fall back to
/// NIFTY so a typo in config degrades to the most liquid contract.
pub fn index_spec(name: &str) -> &'static IndexSpec {
    let upper = name.to_uppercase();
    INDICES
        .iter()
        .find(|s| s.name == upper)
        .unwrap_or(&INDICES[0])
}

pub fn available_indices() -> Vec<&'static str> {
    INDICES.iter().map(|s| s.name).collect()
}

/// Round a spot price to the nearest tradeable strike for the index.
pub fn round_to_strike(price: f64, index_name: &str) -> i64 {
    let interval = index_spec(index_name).strike_interval;
    (price / interval as f64).round() as i64 * interval
}
