//! Request Signatures
//!
//! A signature is the normalized identity of a logical request: the request
//! kind plus its normalized parameters. Two signatures are equal iff every
//! normalized field matches, and equality is the key used to share a single
//! wire request between subscribers.
//!
//! Normalization rules:
//! - text fields are trimmed and upper-cased, blank text is treated as absent
//! - strikes drop trailing zeros (`150.50` and `150.5` are the same strike)
//! - requested extra fields are kept as a sorted, de-duplicated set

use std::collections::BTreeSet;
use std::fmt;

use rust_decimal::Decimal;
use thiserror::Error;

// =============================================================================
// Request Kind
// =============================================================================

/// Kind of logical request served over the gateway connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RequestKind {
    /// Streaming (or one-shot snapshot) market data for a contract.
    MarketData,
    /// All open orders of the account.
    OpenOrders,
    /// Account positions.
    Positions,
    /// Account summary values.
    AccountSummary,
}

impl RequestKind {
    /// Get all request kinds.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[
            Self::MarketData,
            Self::OpenOrders,
            Self::Positions,
            Self::AccountSummary,
        ]
    }

    /// Get the kind name (used as a metrics label).
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::MarketData => "market_data",
            Self::OpenOrders => "open_orders",
            Self::Positions => "positions",
            Self::AccountSummary => "account_summary",
        }
    }
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Contract Identity
// =============================================================================

/// Option right.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum OptionRight {
    /// Put option.
    Put,
    /// Call option.
    Call,
}

impl OptionRight {
    /// Parse `P`, `PUT`, `C` or `CALL` (case-insensitive).
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_uppercase().as_str() {
            "P" | "PUT" => Some(Self::Put),
            "C" | "CALL" => Some(Self::Call),
            _ => None,
        }
    }
}

/// Contract identity fields of a request.
///
/// Values are normalized on construction through the builder methods; build
/// with `ContractKey::default()` and chain `with_*` calls.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContractKey {
    con_id: Option<i64>,
    symbol: Option<String>,
    sec_type: Option<String>,
    exchange: Option<String>,
    currency: Option<String>,
    last_trade_date_or_contract_month: Option<String>,
    strike: Option<Decimal>,
    right: Option<OptionRight>,
}

impl ContractKey {
    /// Create a contract key from a gateway contract id.
    #[must_use]
    pub fn from_con_id(con_id: i64) -> Self {
        Self::default().with_con_id(con_id)
    }

    /// Set the contract id. Non-positive ids are treated as absent.
    #[must_use]
    pub fn with_con_id(mut self, con_id: i64) -> Self {
        self.con_id = (con_id > 0).then_some(con_id);
        self
    }

    /// Set the symbol.
    #[must_use]
    pub fn with_symbol(mut self, symbol: &str) -> Self {
        self.symbol = normalize_text(symbol);
        self
    }

    /// Set the security type (STK, OPT, FUT, ...).
    #[must_use]
    pub fn with_sec_type(mut self, sec_type: &str) -> Self {
        self.sec_type = normalize_text(sec_type);
        self
    }

    /// Set the destination exchange.
    #[must_use]
    pub fn with_exchange(mut self, exchange: &str) -> Self {
        self.exchange = normalize_text(exchange);
        self
    }

    /// Set the currency.
    #[must_use]
    pub fn with_currency(mut self, currency: &str) -> Self {
        self.currency = normalize_text(currency);
        self
    }

    /// Set the last trading day (`YYYYMMDD`) or contract month (`YYYYMM`).
    #[must_use]
    pub fn with_expiry(mut self, expiry: &str) -> Self {
        self.last_trade_date_or_contract_month = normalize_text(expiry);
        self
    }

    /// Set the strike.
    #[must_use]
    pub fn with_strike(mut self, strike: Decimal) -> Self {
        self.strike = Some(strike.normalize());
        self
    }

    /// Set the option right.
    #[must_use]
    pub fn with_right(mut self, right: OptionRight) -> Self {
        self.right = Some(right);
        self
    }

    /// Get the contract id.
    #[must_use]
    pub const fn con_id(&self) -> Option<i64> {
        self.con_id
    }

    /// Get the symbol.
    #[must_use]
    pub fn symbol(&self) -> Option<&str> {
        self.symbol.as_deref()
    }

    /// Get the security type.
    #[must_use]
    pub fn sec_type(&self) -> Option<&str> {
        self.sec_type.as_deref()
    }

    /// Get the exchange.
    #[must_use]
    pub fn exchange(&self) -> Option<&str> {
        self.exchange.as_deref()
    }

    /// Get the currency.
    #[must_use]
    pub fn currency(&self) -> Option<&str> {
        self.currency.as_deref()
    }

    /// Get the last trading day or contract month.
    #[must_use]
    pub fn expiry(&self) -> Option<&str> {
        self.last_trade_date_or_contract_month.as_deref()
    }

    /// Get the strike.
    #[must_use]
    pub const fn strike(&self) -> Option<Decimal> {
        self.strike
    }

    /// Get the option right.
    #[must_use]
    pub const fn right(&self) -> Option<OptionRight> {
        self.right
    }
}

fn normalize_text(s: &str) -> Option<String> {
    let trimmed = s.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_uppercase())
}

// =============================================================================
// Request Parameters
// =============================================================================

/// Error parsing request parameters.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignatureError {
    /// A requested extra field is not a valid field number.
    #[error("invalid generic field '{0}' (expected a non-negative integer)")]
    InvalidGenericField(String),
}

/// Parameters of a logical request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct RequestParams {
    contract: Option<ContractKey>,
    generic_fields: BTreeSet<u16>,
    snapshot: bool,
    regulatory_snapshot: bool,
}

impl RequestParams {
    /// Parameters for a request with no contract (account-wide kinds).
    #[must_use]
    pub fn account_wide() -> Self {
        Self::default()
    }

    /// Parameters for a contract-scoped request.
    #[must_use]
    pub fn for_contract(contract: ContractKey) -> Self {
        Self {
            contract: Some(contract),
            ..Self::default()
        }
    }

    /// Add requested extra fields.
    #[must_use]
    pub fn with_generic_fields(mut self, fields: impl IntoIterator<Item = u16>) -> Self {
        self.generic_fields.extend(fields);
        self
    }

    /// Request a one-shot snapshot instead of a stream.
    #[must_use]
    pub fn with_snapshot(mut self, snapshot: bool) -> Self {
        self.snapshot = snapshot;
        self
    }

    /// Request a regulatory snapshot.
    #[must_use]
    pub fn with_regulatory_snapshot(mut self, regulatory_snapshot: bool) -> Self {
        self.regulatory_snapshot = regulatory_snapshot;
        self
    }

    /// Get the contract.
    #[must_use]
    pub const fn contract(&self) -> Option<&ContractKey> {
        self.contract.as_ref()
    }

    /// Get the requested extra fields in ascending order.
    #[must_use]
    pub const fn generic_fields(&self) -> &BTreeSet<u16> {
        &self.generic_fields
    }

    /// Check if this is a one-shot snapshot request.
    #[must_use]
    pub const fn is_snapshot(&self) -> bool {
        self.snapshot
    }

    /// Check if this is a regulatory snapshot request.
    #[must_use]
    pub const fn is_regulatory_snapshot(&self) -> bool {
        self.regulatory_snapshot
    }
}

/// Parse a comma-separated list of extra field numbers (e.g. `"233, 236"`).
///
/// Blank entries are skipped.
///
/// # Errors
///
/// Returns [`SignatureError::InvalidGenericField`] for an entry that is not
/// a `u16`.
pub fn parse_generic_fields(list: &str) -> Result<BTreeSet<u16>, SignatureError> {
    list.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            entry
                .parse::<u16>()
                .map_err(|_| SignatureError::InvalidGenericField(entry.to_string()))
        })
        .collect()
}

// =============================================================================
// Request Signature
// =============================================================================

/// Normalized identity of a logical request. Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestSignature {
    kind: RequestKind,
    params: RequestParams,
}

impl RequestSignature {
    /// Create a signature.
    #[must_use]
    pub const fn new(kind: RequestKind, params: RequestParams) -> Self {
        Self { kind, params }
    }

    /// Get the request kind.
    #[must_use]
    pub const fn kind(&self) -> RequestKind {
        self.kind
    }

    /// Get the request parameters.
    #[must_use]
    pub const fn params(&self) -> &RequestParams {
        &self.params
    }
}

impl fmt::Display for RequestSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if let Some(contract) = &self.params.contract {
            let label = contract
                .symbol()
                .map(ToString::to_string)
                .or_else(|| contract.con_id().map(|id| format!("#{id}")))
                .unwrap_or_else(|| "?".to_string());
            write!(f, "[{label}]")?;
        }
        if self.params.snapshot {
            f.write_str("(snapshot)")?;
        }
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
