// Exchange info-API client
pub mod hyperliquid;

pub use hyperliquid::HyperliquidClient;
