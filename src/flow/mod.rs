pub mod action;
pub mod context;
pub mod events;
pub mod node;
pub mod parallel;
pub mod registry;
pub mod serial;
pub mod spec;
pub mod task;

pub use action::{action_fn, callback, Action, ActionContext, CallbackAction, Completed, Completion, EchoAction, FnAction, LogMessage};
pub use context::FlowContext;
pub use events::{
    BufferingListener, ChannelListener, EventEnvelope, EventHub, EventSink, LogEntry, LoggingListener, TaskInfo,
    TaskListener, TaskResult, TreeEvent,
};
pub use node::{DependentKind, Node, Outcome, Tally};
pub use parallel::ParallelGroup;
pub use registry::ActionRegistry;
pub use serial::SerialChain;
pub use spec::{ChainEntry, ChainMember, ChainSpec, DependentChains, GroupSpec, MemberSpec, TaskSpec};
pub use task::{Task, TaskState};
