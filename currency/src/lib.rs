mod conversion;
mod converter;

pub use conversion::{Conversions, try_parse_date};
pub use converter::{AlreadyRunning, CurrencyConverter, FetchError, HttpGet, HttpGetError, ReqwestGet};
