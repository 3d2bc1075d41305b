//! Value-type configuration for tasks, parallel groups and serial chains
//!
//! Specs deserialize from YAML (actions referenced by name) and can be built
//! in code with inline actions. Nodes are instantiated from specs on every
//! run, so one spec can drive any number of executions.

use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

use crate::core::{EngineError, NodeId, Result};
use crate::flow::action::Action;
use crate::flow::node::DependentKind;
use crate::flow::registry::ActionRegistry;

pub(crate) fn default_enabled() -> bool {
    true
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawId {
    Text(String),
    Number(i64),
}

// Ids may be written as strings or numbers
pub(crate) fn deserialize_id<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<RawId>::deserialize(deserializer)?;
    Ok(raw.map(|id| match id {
        RawId::Text(text) => text,
        RawId::Number(number) => number.to_string(),
    }))
}

/// Chains to launch after a node's outcome is known
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DependentChains {
    #[serde(default)]
    pub success: Option<ChainSpec>,
    #[serde(default)]
    pub failure: Option<ChainSpec>,
    #[serde(default)]
    pub complete: Option<ChainSpec>,
}

impl DependentChains {
    pub fn get(&self, kind: DependentKind) -> Option<&ChainSpec> {
        let chain = match kind {
            DependentKind::Success => self.success.as_ref(),
            DependentKind::Failure => self.failure.as_ref(),
            DependentKind::Complete => self.complete.as_ref(),
        };
        chain.filter(|chain| !chain.is_empty())
    }

    pub fn set(&mut self, kind: DependentKind, chain: ChainSpec) {
        let slot = match kind {
            DependentKind::Success => &mut self.success,
            DependentKind::Failure => &mut self.failure,
            DependentKind::Complete => &mut self.complete,
        };
        *slot = Some(chain);
    }

    pub fn is_empty(&self) -> bool {
        DependentKind::ALL.iter().all(|kind| self.get(*kind).is_none())
    }
}

/// Leaf task configuration
#[derive(Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TaskSpec {
    #[serde(default, deserialize_with = "deserialize_id")]
    pub id: Option<String>,
    /// Name of a registered action
    #[serde(default)]
    pub action: Option<String>,
    /// Inline action, takes precedence over `action`
    #[serde(skip)]
    pub handler: Option<Arc<dyn Action>>,
    /// Opaque payload handed to the action
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub disabled: bool,
    #[serde(default)]
    pub description: String,
    /// Milliseconds, 0 = unbounded
    #[serde(default)]
    pub timeout: u64,
    #[serde(default)]
    pub verbose: bool,
    #[serde(default)]
    pub on: DependentChains,
}

impl Default for TaskSpec {
    fn default() -> Self {
        Self {
            id: None,
            action: None,
            handler: None,
            data: None,
            enabled: true,
            disabled: false,
            description: String::new(),
            timeout: 0,
            verbose: false,
            on: DependentChains::default(),
        }
    }
}

impl fmt::Debug for TaskSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskSpec")
            .field("id", &self.id)
            .field("action", &self.action_name())
            .field("data", &self.data)
            .field("enabled", &self.is_enabled())
            .field("description", &self.description)
            .field("timeout", &self.timeout)
            .field("on", &self.on)
            .finish()
    }
}

impl TaskSpec {
    /// Task running an inline action
    pub fn new(action: Arc<dyn Action>) -> Self {
        Self {
            handler: Some(action),
            ..Self::default()
        }
    }

    /// Task running a registered action
    pub fn named(action: impl Into<String>) -> Self {
        Self {
            action: Some(action.into()),
            ..Self::default()
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_timeout(mut self, timeout_ms: u64) -> Self {
        self.timeout = timeout_ms;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn verbose(mut self) -> Self {
        self.verbose = true;
        self
    }

    pub fn on(mut self, kind: DependentKind, chain: ChainSpec) -> Self {
        self.on.set(kind, chain);
        self
    }

    pub fn on_success(self, chain: ChainSpec) -> Self {
        self.on(DependentKind::Success, chain)
    }

    pub fn on_failure(self, chain: ChainSpec) -> Self {
        self.on(DependentKind::Failure, chain)
    }

    pub fn on_complete(self, chain: ChainSpec) -> Self {
        self.on(DependentKind::Complete, chain)
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled && !self.disabled
    }

    /// Label used in events and diagnostics
    pub fn action_name(&self) -> String {
        match (&self.handler, &self.action) {
            (Some(handler), _) => handler.name().to_string(),
            (None, Some(name)) => name.clone(),
            (None, None) => String::new(),
        }
    }

    /// Resolve the action to invoke: inline handler first, then the registry
    pub fn resolve_action(&self, id: &NodeId, registry: &ActionRegistry) -> Result<Arc<dyn Action>> {
        if let Some(handler) = &self.handler {
            return Ok(handler.clone());
        }
        match self.action.as_deref() {
            None | Some("") => Err(EngineError::missing_action(id)),
            Some(name) => registry
                .get(name)
                .ok_or_else(|| EngineError::invalid_action(id, name)),
        }
    }
}

/// Parallel group configuration. Doubles as a chain stage.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GroupSpec {
    #[serde(default, deserialize_with = "deserialize_id")]
    pub id: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub disabled: bool,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub verbose: bool,
    /// Members, started in this order
    pub set: Vec<MemberSpec>,
    #[serde(default)]
    pub on: DependentChains,
}

impl GroupSpec {
    pub fn new(members: Vec<MemberSpec>) -> Self {
        Self {
            id: None,
            enabled: true,
            disabled: false,
            description: String::new(),
            verbose: false,
            set: members,
            on: DependentChains::default(),
        }
    }

    pub fn of_tasks(tasks: Vec<TaskSpec>) -> Self {
        Self::new(tasks.into_iter().map(MemberSpec::Task).collect())
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn verbose(mut self) -> Self {
        self.verbose = true;
        self
    }

    pub fn on(mut self, kind: DependentKind, chain: ChainSpec) -> Self {
        self.on.set(kind, chain);
        self
    }

    pub fn on_success(self, chain: ChainSpec) -> Self {
        self.on(DependentKind::Success, chain)
    }

    pub fn on_failure(self, chain: ChainSpec) -> Self {
        self.on(DependentKind::Failure, chain)
    }

    pub fn on_complete(self, chain: ChainSpec) -> Self {
        self.on(DependentKind::Complete, chain)
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled && !self.disabled
    }
}

/// A serial chain nested as a group member
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChainMember {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub disabled: bool,
    #[serde(default)]
    pub description: String,
    pub chain: ChainSpec,
}

/// Anything a parallel group can hold
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum MemberSpec {
    Group(GroupSpec),
    Chain(ChainMember),
    Task(TaskSpec),
}

impl MemberSpec {
    pub fn is_enabled(&self) -> bool {
        match self {
            MemberSpec::Group(group) => group.is_enabled(),
            MemberSpec::Chain(chain) => chain.enabled && !chain.disabled,
            MemberSpec::Task(task) => task.is_enabled(),
        }
    }
}

impl From<TaskSpec> for MemberSpec {
    fn from(task: TaskSpec) -> Self {
        MemberSpec::Task(task)
    }
}

impl From<GroupSpec> for MemberSpec {
    fn from(group: GroupSpec) -> Self {
        MemberSpec::Group(group)
    }
}

impl From<ChainSpec> for MemberSpec {
    fn from(chain: ChainSpec) -> Self {
        MemberSpec::Chain(ChainMember {
            enabled: true,
            disabled: false,
            description: String::new(),
            chain,
        })
    }
}

/// One entry of a chain: an explicit stage, or a bare member that belongs to
/// the implicit single stage
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ChainEntry {
    Stage(GroupSpec),
    Member(MemberSpec),
}

/// Serial chain configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(transparent)]
pub struct ChainSpec {
    entries: Vec<ChainEntry>,
}

impl ChainSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: Vec<ChainEntry>) -> Self {
        Self { entries }
    }

    pub fn of_stages(stages: Vec<GroupSpec>) -> Self {
        Self::from_entries(stages.into_iter().map(ChainEntry::Stage).collect())
    }

    /// A single implicit stage running `tasks` in parallel
    pub fn of_tasks(tasks: Vec<TaskSpec>) -> Self {
        Self::from_entries(
            tasks
                .into_iter()
                .map(|task| ChainEntry::Member(MemberSpec::Task(task)))
                .collect(),
        )
    }

    pub fn push(mut self, entry: ChainEntry) -> Self {
        self.entries.push(entry);
        self
    }

    pub fn entries(&self) -> &[ChainEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Normalize into an ordered stage list.
    ///
    /// A list of stages is taken as is, a list of bare members becomes one
    /// implicit stage. Mixing both is rejected.
    pub fn stages(&self, chain_id: &NodeId) -> Result<Vec<GroupSpec>> {
        let stage_count = self
            .entries
            .iter()
            .filter(|entry| matches!(entry, ChainEntry::Stage(_)))
            .count();

        if stage_count == self.entries.len() {
            return Ok(self
                .entries
                .iter()
                .filter_map(|entry| match entry {
                    ChainEntry::Stage(stage) => Some(stage.clone()),
                    ChainEntry::Member(_) => None,
                })
                .collect());
        }

        if stage_count == 0 {
            let members = self
                .entries
                .iter()
                .filter_map(|entry| match entry {
                    ChainEntry::Member(member) => Some(member.clone()),
                    ChainEntry::Stage(_) => None,
                })
                .collect();
            return Ok(vec![GroupSpec::new(members)]);
        }

        Err(EngineError::invalid_stage_list(
            chain_id,
            format!(
                "{} of {} entries are stages; a chain is either a list of stages or a list of tasks",
                stage_count,
                self.entries.len()
            ),
        ))
    }
}

impl From<Vec<GroupSpec>> for ChainSpec {
    fn from(stages: Vec<GroupSpec>) -> Self {
        Self::of_stages(stages)
    }
}
