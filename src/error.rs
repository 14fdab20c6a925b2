use crate::common::{Addr, Gas, Hash};
use crate::evm::ExecError;
use crate::gas::OutOfGas;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// How a failure is surfaced to the caller.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ErrorKind {
    /// Rejected before execution; no fee is charged.
    Admission,
    /// The VM failed; the pre-charged fee is kept.
    Execution,
    /// Broken invocation contract or missing governance data.
    Fatal,
    OutOfGas,
}

#[derive(Clone, PartialEq, Eq, Debug, thiserror::Error)]
pub enum Error {
    #[error("insufficient fee: {0}")]
    InsufficientFee(String),
    #[error("invalid transaction: {0}")]
    InvalidTx(String),
    #[error("invalid nonce; got {got}, expected {expected}")]
    InvalidSequence { expected: u64, got: u64 },
    #[error("invalid account number for height zero (got {0})")]
    InvalidAccountNumber(u64),
    #[error("insufficient funds: {0}")]
    InsufficientFunds(String),
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("invalid chain id: {0}")]
    InvalidChainId(String),
    #[error("intrinsic gas too low: {got} < {required}")]
    IntrinsicGasTooLow { got: Gas, required: Gas },
    #[error("unknown transaction type: {0}")]
    UnknownTxType(String),
    #[error("unknown request: {0}")]
    UnknownRequest(String),
    #[error("unknown extension options")]
    UnknownExtensionOptions,
    #[error("tx has timed out; timeout height: {timeout}, current height: {height}")]
    TxTimeoutHeight { timeout: u64, height: u64 },
    #[error("maximum number of characters is {max} but received {len} characters")]
    MemoTooLarge { len: usize, max: u64 },
    #[error("signatures: {got}, limit: {max}")]
    TooManySignatures { got: u64, max: u64 },
    #[error("invalid pubkey: {0}")]
    InvalidPubKey(String),
    #[error("account {0} does not exist")]
    UnknownAddress(String),
    #[error("out of gas in location: {location}; gasWanted: {gas_wanted}, gasUsed: {gas_used}")]
    OutOfGas {
        location: String,
        gas_wanted: Gas,
        gas_used: Gas,
    },
    /// Raw meter signal, only valid until the setup decorator converts it.
    #[error(transparent)]
    GasMeter(#[from] OutOfGas),
    #[error("evm execution failed: {0}")]
    Vm(#[from] ExecError),
    #[error("chain configuration not found")]
    ChainConfigNotFound,
    #[error("evm params not found")]
    ParamsNotFound,
    #[error("invalid chain configuration: {0}")]
    InvalidChainConfig(String),
    #[error("invalid params: {0}")]
    InvalidParams(String),
    #[error("sender address cannot be empty")]
    MissingSender,
    #[error("cannot set empty logs for tx {0}")]
    EmptyLogs(Hash),
    #[error("logs not found for tx {0}")]
    LogsNotFound(Hash),
    #[error("block not found: {0}")]
    BlockNotFound(String),
    #[error("block bloom not found for height {0}")]
    BloomNotFound(u64),
    #[error("invalid state: {0}")]
    InvalidState(String),
    #[error("invalid genesis: {0}")]
    InvalidGenesis(String),
    #[error("invalid address: {0}")]
    ZeroAddress(Addr),
    #[error("codec error: {0}")]
    Codec(String),
    #[error("invalid config: {0}")]
    Config(String),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        use Error::*;
        match self {
            Vm(_) => ErrorKind::Execution,
            OutOfGas { .. } | GasMeter(_) => ErrorKind::OutOfGas,
            ChainConfigNotFound | ParamsNotFound | InvalidChainConfig(_) |
            InvalidParams(_) | MissingSender | InvalidState(_) |
            InvalidGenesis(_) | Codec(_) | Config(_) => ErrorKind::Fatal,
            _ => ErrorKind::Admission,
        }
    }

    /// Stable numeric code reported alongside the message.
    pub fn code(&self) -> u32 {
        use Error::*;
        match self {
            InvalidTx(_) | TxTimeoutHeight { .. } | MemoTooLarge { .. } => 3,
            Unauthorized(_) => 4,
            InsufficientFunds(_) => 5,
            UnknownTxType(_) | UnknownRequest(_) => 6,
            InvalidSequence { .. } | InvalidAccountNumber(_) => 7,
            UnknownAddress(_) => 9,
            OutOfGas { .. } | GasMeter(_) | IntrinsicGasTooLow { .. } => 11,
            InsufficientFee(_) => 13,
            TooManySignatures { .. } => 14,
            InvalidPubKey(_) => 16,
            InvalidChainId(_) => 19,
            UnknownExtensionOptions => 31,
            Vm(_) => 101,
            ChainConfigNotFound => 102,
            InvalidChainConfig(_) => 103,
            ZeroAddress(_) => 104,
            EmptyLogs(_) | LogsNotFound(_) => 105,
            BlockNotFound(_) => 106,
            BloomNotFound(_) => 107,
            InvalidState(_) => 108,
            InvalidParams(_) => 109,
            InvalidGenesis(_) => 110,
            MissingSender => 111,
            Codec(_) => 112,
            Config(_) => 113,
            ParamsNotFound => 114,
        }
    }

    /// Turn the raw meter signal into the typed out-of-gas error. Every
    /// other error passes through unchanged.
    pub fn into_out_of_gas(self, gas_wanted: Gas, gas_used: Gas) -> Self {
        match self {
            Error::GasMeter(oog) => Error::OutOfGas {
                location: oog.descriptor,
                gas_wanted,
                gas_used,
            },
            err => err,
        }
    }
}

impl From<rlp::DecoderError> for Error {
    fn from(e: rlp::DecoderError) -> Self {
        Error::Codec(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Codec(e.to_string())
    }
}
