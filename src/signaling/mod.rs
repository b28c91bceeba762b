pub mod call_flow;

pub use call_flow::{Accepted, CallFlow, CallFlowState, FlowViolation, SignalKind};
