// 1. Traits
pub use crate::math::indicator::StreamingIndicator;

// 2. The Core "Loop" Types
pub use crate::engine::{Authorization, Decision, DecisionCore};
pub use crate::kinematics::{DetectorBank, KinematicState, MicroState, Regime, RegimeDetector};

// 3. Domain Types
pub use crate::domain::{
    AgentId, EntryFeatures, Equity, InstrumentId, Price, TradeAction, TradeOutcome, Volatility,
};
pub use crate::kinematics::LearningRegime;

// 4. Learner, Gate & Governor
pub use crate::breaker::{BreakerStatus, CircuitBreaker, RiskSignals};
pub use crate::edge::{EdgeGate, EdgeSample};
pub use crate::learner::{AgentRewardShaper, ProbabilityPredictor, TradingAgent};

// 5. Configuration
pub use crate::config::{
    AgentConfig, BreakerConfig, CoreConfig, DetectorConfig, EdgeConfig, PersistenceConfig,
};

// 6. Persistence & Reporting
pub use crate::persistence::{PersistedSnapshot, PersistenceManager, RestoreSource, Restored};
pub use crate::report::CoreStatistics;

// 7. Errors
pub use crate::error::{
    ConfigError, CoreError, CoreResult, IntegrityError, PersistenceError, SystemError,
};
