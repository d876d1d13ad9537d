pub mod engine;
pub mod registry;
pub mod serializer;

pub use engine::{
    AgentConfig, BoxedSessionEngine, EngineError, EngineHandle, EngineResult, EngineSession,
    RealtimeEvent, SessionEngine, TeardownContext, create_session_engine,
    get_supported_engine_kinds,
};
pub use registry::{
    Connection, ConnectionId, OutboundFrame, SessionId, SessionPhase, SessionRegistry,
    TeardownPolicy,
};
pub use serializer::{EventRecord, serialize_event};
