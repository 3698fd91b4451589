// Order execution: broker seam and the position lifecycle manager.
pub mod broker;
pub mod position_manager;

pub use broker::{Broker, FeeModel, PaperBroker};
pub use position_manager::{
    BreakevenBuffer, CandleContext, Phase, Position, PositionConfig, PositionManager,
};
