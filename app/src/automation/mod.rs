mod condition;
mod engine;
mod trigger;

pub use engine::{AutomationEngine, EngineCaches};
pub use trigger::Stimulus;
