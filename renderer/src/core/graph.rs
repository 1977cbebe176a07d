//! Hierarchical state tree with a `(state, trigger) -> state` transition table.
//!
//! States live in an arena under a synthetic root. Leaves are bound to exactly
//! one action; any state may carry entry/exit hooks. Transitions are declared
//! by qualified name (`Parent.Child`) and resolved to ids at build time.

use std::collections::HashMap;

use anyhow::{Result, anyhow, bail};

use crate::core::trigger::Trigger;

pub type StateId = usize;

pub const SEPARATOR: char = '.';

const ROOT: StateId = 0;

/// Entry/exit hooks implemented by the render context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Hook {
    StartImplementingFrid,
    FinishImplementingFrid,
    CheckFridIterationLimit,
    StartUnitTestsProcessing,
    StartUnitTestsProcessingInConformance,
    FinishUnitTestsProcessing,
    StartFixingUnitTests,
    StartFixingUnitTestsInRefactoring,
    StartFixingUnitTestsInConformance,
    StartRefactoringCode,
    StartConformanceTestsProcessing,
    FinishConformanceTestsProcessing,
    StartConformanceTestsForFrid,
    StartTestingEnvironmentPreparation,
    StartFixingConformanceTests,
    FinishFixingConformanceTests,
}

/// Action bound to a leaf state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionId {
    PrepareRepositories,
    RenderFunctionalRequirement,
    RunUnitTests,
    FixUnitTests,
    CommitImplementedCode,
    RefactorCode,
    CommitRefactoredCode,
    RenderConformanceTests,
    PrepareTestingEnvironment,
    RunConformanceTests,
    FixConformanceTest,
    SummarizeConformanceTests,
    CommitConformanceTestsChanges,
    AnalyzeSpecificationAmbiguity,
    FinishFunctionalRequirement,
    CreateDist,
    ExitWithError,
}

#[derive(Debug, Clone)]
struct StateNode {
    qualified: String,
    parent: Option<StateId>,
    children: Vec<StateId>,
    on_enter: Option<Hook>,
    on_exit: Option<Hook>,
    action: Option<ActionId>,
    terminal: bool,
}

impl StateNode {
    fn new(qualified: String, parent: Option<StateId>) -> Self {
        Self {
            qualified,
            parent,
            children: Vec::new(),
            on_enter: None,
            on_exit: None,
            action: None,
            terminal: false,
        }
    }
}

#[derive(Debug)]
pub struct GraphBuilder {
    nodes: Vec<StateNode>,
    by_name: HashMap<String, StateId>,
    transitions: HashMap<(StateId, Trigger), StateId>,
    wildcards: HashMap<Trigger, StateId>,
}

impl Default for GraphBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self {
            nodes: vec![StateNode::new(String::new(), None)],
            by_name: HashMap::new(),
            transitions: HashMap::new(),
            wildcards: HashMap::new(),
        }
    }

    pub fn root(&self) -> StateId {
        ROOT
    }

    /// Add a state without an action. The first child added becomes the initial state.
    pub fn composite(&mut self, parent: StateId, name: &str) -> Result<StateId> {
        self.add(parent, name)
    }

    pub fn leaf(&mut self, parent: StateId, name: &str, action: ActionId) -> Result<StateId> {
        let id = self.add(parent, name)?;
        self.nodes[id].action = Some(action);
        Ok(id)
    }

    /// Leaf whose action runs once, after which the driver stops.
    pub fn terminal(&mut self, parent: StateId, name: &str, action: ActionId) -> Result<StateId> {
        let id = self.leaf(parent, name, action)?;
        self.nodes[id].terminal = true;
        Ok(id)
    }

    pub fn on_enter(&mut self, state: StateId, hook: Hook) {
        self.nodes[state].on_enter = Some(hook);
    }

    pub fn on_exit(&mut self, state: StateId, hook: Hook) {
        self.nodes[state].on_exit = Some(hook);
    }

    pub fn transition(&mut self, from: &str, trigger: Trigger, to: &str) -> Result<()> {
        let from = self.lookup(from)?;
        let to = self.lookup(to)?;
        self.transition_ids(from, trigger, to)
    }

    pub fn transition_ids(&mut self, from: StateId, trigger: Trigger, to: StateId) -> Result<()> {
        if let Some(existing) = self.transitions.insert((from, trigger), to) {
            bail!(
                "duplicate transition {} -{}-> {} (already -> {})",
                self.nodes[from].qualified,
                trigger,
                self.nodes[to].qualified,
                self.nodes[existing].qualified
            );
        }
        Ok(())
    }

    /// Transition available from every state.
    pub fn wildcard(&mut self, trigger: Trigger, to: &str) -> Result<()> {
        let to = self.lookup(to)?;
        if self.wildcards.insert(trigger, to).is_some() {
            bail!("duplicate wildcard transition for {trigger}");
        }
        Ok(())
    }

    pub fn build(self) -> Result<StateGraph> {
        if self.nodes[ROOT].children.is_empty() {
            bail!("state graph has no states");
        }
        for node in self.nodes.iter().skip(1) {
            let is_leaf = node.children.is_empty();
            if is_leaf && node.action.is_none() {
                bail!("leaf state {} has no action", node.qualified);
            }
            if !is_leaf && node.action.is_some() {
                bail!("composite state {} must not carry an action", node.qualified);
            }
        }
        Ok(StateGraph {
            nodes: self.nodes,
            by_name: self.by_name,
            transitions: self.transitions,
            wildcards: self.wildcards,
        })
    }

    fn add(&mut self, parent: StateId, name: &str) -> Result<StateId> {
        if name.is_empty() || name.contains(SEPARATOR) {
            bail!("invalid state name '{name}'");
        }
        if self.nodes[parent].action.is_some() {
            bail!("leaf state {} cannot have children", self.nodes[parent].qualified);
        }
        let qualified = if parent == ROOT {
            name.to_string()
        } else {
            format!("{}{SEPARATOR}{name}", self.nodes[parent].qualified)
        };
        if self.by_name.contains_key(&qualified) {
            bail!("duplicate state {qualified}");
        }
        let id = self.nodes.len();
        self.nodes.push(StateNode::new(qualified.clone(), Some(parent)));
        self.nodes[parent].children.push(id);
        self.by_name.insert(qualified, id);
        Ok(id)
    }

    fn lookup(&self, qualified: &str) -> Result<StateId> {
        self.by_name
            .get(qualified)
            .copied()
            .ok_or_else(|| anyhow!("unknown state {qualified}"))
    }
}

/// Immutable state tree plus transition table.
#[derive(Debug)]
pub struct StateGraph {
    nodes: Vec<StateNode>,
    by_name: HashMap<String, StateId>,
    transitions: HashMap<(StateId, Trigger), StateId>,
    wildcards: HashMap<Trigger, StateId>,
}

impl StateGraph {
    /// First top-level state.
    pub fn initial_state(&self) -> StateId {
        self.nodes[ROOT].children[0]
    }

    pub fn state(&self, qualified: &str) -> Option<StateId> {
        self.by_name.get(qualified).copied()
    }

    pub fn name(&self, state: StateId) -> &str {
        &self.nodes[state].qualified
    }

    pub fn action(&self, state: StateId) -> Option<ActionId> {
        self.nodes[state].action
    }

    pub fn is_terminal(&self, state: StateId) -> bool {
        self.nodes[state].terminal
    }

    pub fn on_enter(&self, state: StateId) -> Option<Hook> {
        self.nodes[state].on_enter
    }

    pub fn on_exit(&self, state: StateId) -> Option<Hook> {
        self.nodes[state].on_exit
    }

    pub fn parent(&self, state: StateId) -> Option<StateId> {
        self.nodes[state].parent
    }

    pub fn initial_child(&self, state: StateId) -> Option<StateId> {
        self.nodes[state].children.first().copied()
    }

    /// Ids of all leaf states, in declaration order.
    pub fn leaves(&self) -> impl Iterator<Item = StateId> + '_ {
        (1..self.nodes.len()).filter(|id| self.nodes[*id].children.is_empty())
    }

    /// Destination for `trigger`, searching the state and then its ancestors.
    pub fn resolve(&self, current: StateId, trigger: Trigger) -> Option<StateId> {
        let mut cursor = Some(current);
        while let Some(state) = cursor {
            if let Some(dest) = self.transitions.get(&(state, trigger)) {
                return Some(*dest);
            }
            cursor = self.nodes[state].parent;
        }
        self.wildcards.get(&trigger).copied()
    }

    pub fn is_ancestor_or_self(&self, ancestor: StateId, state: StateId) -> bool {
        let mut cursor = Some(state);
        while let Some(node) = cursor {
            if node == ancestor {
                return true;
            }
            cursor = self.nodes[node].parent;
        }
        false
    }

    /// State that stays active across a transition from `current` to `dest`.
    ///
    /// Transitions to an ancestor (or to the state itself) exit and re-enter the
    /// destination, so the scope is the destination's parent.
    pub fn scope(&self, current: StateId, dest: StateId) -> StateId {
        if self.is_ancestor_or_self(dest, current) {
            return self.nodes[dest].parent.unwrap_or(ROOT);
        }
        let mut cursor = Some(current);
        while let Some(node) = cursor {
            if self.is_ancestor_or_self(node, dest) {
                return node;
            }
            cursor = self.nodes[node].parent;
        }
        ROOT
    }

    /// States from `scope` (exclusive) down to `dest` (inclusive).
    pub fn path_from(&self, scope: StateId, dest: StateId) -> Vec<StateId> {
        let mut path = Vec::new();
        let mut cursor = Some(dest);
        while let Some(node) = cursor {
            if node == scope {
                break;
            }
            path.push(node);
            cursor = self.nodes[node].parent;
        }
        path.reverse();
        path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> StateGraph {
        let mut b = GraphBuilder::new();
        let root = b.root();
        b.leaf(root, "Start", ActionId::PrepareRepositories)
            .expect("start");
        let work = b.composite(root, "Work").expect("work");
        b.leaf(work, "A", ActionId::RunUnitTests).expect("a");
        let nested = b.composite(work, "Nested").expect("nested");
        b.leaf(nested, "B", ActionId::FixUnitTests).expect("b");
        b.terminal(root, "Done", ActionId::CreateDist).expect("done");
        b.terminal(root, "Failed", ActionId::ExitWithError)
            .expect("failed");
        b.transition("Start", Trigger::StartRender, "Work")
            .expect("t1");
        b.transition("Work.A", Trigger::MarkUnitTestsFailed, "Work.Nested.B")
            .expect("t2");
        b.transition("Work", Trigger::PrepareFinalOutput, "Done")
            .expect("t3");
        b.wildcard(Trigger::HandleError, "Failed").expect("wild");
        b.build().expect("build")
    }

    #[test]
    fn qualified_names_join_with_separator() {
        let g = sample();
        let b = g.state("Work.Nested.B").expect("b");
        assert_eq!(g.name(b), "Work.Nested.B");
        assert_eq!(g.name(g.initial_state()), "Start");
        assert_eq!(g.initial_child(g.state("Work").expect("work")), g.state("Work.A"));
    }

    #[test]
    fn resolve_searches_ancestors_then_wildcards() {
        let g = sample();
        let b = g.state("Work.Nested.B").expect("b");
        assert_eq!(g.resolve(b, Trigger::PrepareFinalOutput), g.state("Done"));
        assert_eq!(g.resolve(b, Trigger::HandleError), g.state("Failed"));
        assert_eq!(g.resolve(b, Trigger::StartRender), None);
    }

    #[test]
    fn scope_of_transition_to_ancestor_is_its_parent() {
        let g = sample();
        let b = g.state("Work.Nested.B").expect("b");
        let work = g.state("Work").expect("work");
        let a = g.state("Work.A").expect("a");
        assert_eq!(g.scope(b, work), ROOT);
        assert_eq!(g.scope(a, b), work);
        assert_eq!(g.path_from(work, b), vec![g.state("Work.Nested").expect("n"), b]);
    }

    #[test]
    fn build_rejects_leaf_without_action_and_unknown_names() {
        let mut b = GraphBuilder::new();
        let root = b.root();
        b.composite(root, "Empty").expect("empty");
        assert!(b.build().is_err());

        let mut b = GraphBuilder::new();
        let root = b.root();
        b.leaf(root, "Only", ActionId::CreateDist).expect("only");
        assert!(b.transition("Only", Trigger::StartRender, "Missing").is_err());
        assert!(b.leaf(root, "Only", ActionId::CreateDist).is_err());
        assert!(b.leaf(root, "Bad.Name", ActionId::CreateDist).is_err());
    }

    #[test]
    fn duplicate_transitions_are_rejected() {
        let mut b = GraphBuilder::new();
        let root = b.root();
        b.leaf(root, "X", ActionId::CreateDist).expect("x");
        b.leaf(root, "Y", ActionId::CreateDist).expect("y");
        b.transition("X", Trigger::StartRender, "Y").expect("first");
        assert!(b.transition("X", Trigger::StartRender, "X").is_err());
    }
}
