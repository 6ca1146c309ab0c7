//! Plan steps

use std::collections::{HashMap, HashSet};
use std::fmt::Write as _;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::FleetError;
use crate::models::Host;

/// What a step does once its dependencies are done
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepAction {
    #[default]
    None,
    Build,
    Push,
}

/// Declared reaction to a failing step
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OnFailure {
    Retry,
    #[default]
    Exit,
    Ignore,
}

/// A node of an execution plan.
///
/// Steps form a containment tree; `depends_on` references any other step of
/// the same plan by id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Step {
    pub id: String,
    pub description: String,
    pub action: StepAction,
    pub parallel: bool,
    pub on_failure: OnFailure,
    #[serde(default)]
    pub options: IndexMap<String, Value>,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub steps: Vec<Step>,
}

impl Step {
    /// New step with a fresh id
    pub fn new(description: impl Into<String>, action: StepAction) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            description: description.into(),
            action,
            parallel: false,
            on_failure: OnFailure::Exit,
            options: IndexMap::new(),
            depends_on: Vec::new(),
            steps: Vec::new(),
        }
    }

    /// Step doing nothing itself, used to group other steps
    pub fn empty() -> Self {
        Self::new("", StepAction::None)
    }

    pub fn parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn on_failure(mut self, on_failure: OnFailure) -> Self {
        self.on_failure = on_failure;
        self
    }

    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    pub fn depends_on(mut self, id: impl Into<String>) -> Self {
        self.depends_on.push(id.into());
        self
    }

    pub fn with_steps(mut self, steps: impl IntoIterator<Item = Step>) -> Self {
        self.steps.extend(steps);
        self
    }

    /// String option, if present
    pub fn option_str(&self, key: &str) -> Option<&str> {
        self.options.get(key).and_then(|v| v.as_str())
    }

    /// String list option, empty when absent
    pub fn option_strings(&self, key: &str) -> Vec<String> {
        self.options
            .get(key)
            .and_then(|v| v.as_array())
            .map(|values| {
                values
                    .iter()
                    .filter_map(|v| v.as_str().map(String::from))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// This step and all of its descendants, depth first
    pub fn walk(&self) -> Vec<&Step> {
        let mut steps = vec![self];
        for child in &self.steps {
            steps.extend(child.walk());
        }
        steps
    }

    /// Check that ids are unique and every dependency resolves inside the plan
    pub fn validate(&self) -> Result<(), FleetError> {
        let mut ids = HashSet::new();
        for step in self.walk() {
            if !ids.insert(step.id.as_str()) {
                return Err(FleetError::PlanError(format!("duplicate step id {}", step.id)));
            }
        }

        for step in self.walk() {
            for dependency in &step.depends_on {
                if dependency == &step.id {
                    return Err(FleetError::PlanError(format!(
                        "step '{}' depends on itself",
                        step.description
                    )));
                }
                if !ids.contains(dependency.as_str()) {
                    return Err(FleetError::PlanError(format!(
                        "step '{}' depends on unknown step {}",
                        step.description, dependency
                    )));
                }
            }
        }

        self.check_nesting(&mut Vec::new())?;
        self.check_cycles()
    }

    // a step only finishes after its children, and its children only start
    // after its dependencies, so neither may depend on the other
    fn check_nesting<'a>(&'a self, ancestors: &mut Vec<&'a str>) -> Result<(), FleetError> {
        if let Some(dependency) = self
            .depends_on
            .iter()
            .find(|dependency| ancestors.contains(&dependency.as_str()))
        {
            return Err(FleetError::PlanError(format!(
                "step '{}' depends on its ancestor {}",
                self.description, dependency
            )));
        }

        let descendants: HashSet<&str> = self
            .walk()
            .into_iter()
            .skip(1)
            .map(|step| step.id.as_str())
            .collect();
        if let Some(dependency) = self
            .depends_on
            .iter()
            .find(|dependency| descendants.contains(dependency.as_str()))
        {
            return Err(FleetError::PlanError(format!(
                "step '{}' depends on its descendant {}",
                self.description, dependency
            )));
        }

        ancestors.push(&self.id);
        for child in &self.steps {
            child.check_nesting(ancestors)?;
        }
        ancestors.pop();

        Ok(())
    }

    fn check_cycles(&self) -> Result<(), FleetError> {
        let mut waits = HashMap::new();
        self.collect_waits(&[], &mut waits);

        let mut marks = HashMap::new();
        for step in self.walk() {
            if let Some(id) = find_cycle(&step.id, &waits, &mut marks) {
                return Err(FleetError::PlanError(format!("dependency cycle through step {}", id)));
            }
        }

        Ok(())
    }

    // maps each step to the steps that must be done before it is: its own
    // and its ancestors' dependencies, and its children
    fn collect_waits<'a>(&'a self, inherited: &[&'a str], waits: &mut HashMap<&'a str, Vec<&'a str>>) {
        let mut before = inherited.to_vec();
        before.extend(self.depends_on.iter().map(String::as_str));

        let mut edges = before.clone();
        edges.extend(self.steps.iter().map(|child| child.id.as_str()));
        waits.insert(&self.id, edges);

        for child in &self.steps {
            child.collect_waits(&before, waits);
        }
    }

    /// Indented human readable tree
    pub fn render(&self) -> String {
        let mut out = String::new();
        self.render_into(&mut out, 0);
        out
    }

    fn render_into(&self, out: &mut String, depth: usize) {
        let description = if self.description.is_empty() {
            "plan"
        } else {
            &self.description
        };
        let _ = write!(
            out,
            "{}- {} [{:?}{}]",
            "  ".repeat(depth),
            description,
            self.action,
            if self.parallel { ", parallel" } else { "" }
        );
        if !self.depends_on.is_empty() {
            let _ = write!(out, " after {}", self.depends_on.join(", "));
        }
        let _ = writeln!(out, " ({})", self.id);

        for child in &self.steps {
            child.render_into(out, depth + 1);
        }
    }
}

/// Depth first search for a step reachable from itself; `marks` is false
/// while a step is on the current path and true once it is cleared
fn find_cycle<'a>(
    id: &'a str,
    waits: &HashMap<&'a str, Vec<&'a str>>,
    marks: &mut HashMap<&'a str, bool>,
) -> Option<&'a str> {
    match marks.get(id) {
        Some(true) => return None,
        Some(false) => return Some(id),
        None => {}
    }

    marks.insert(id, false);
    for &next in waits.get(id).into_iter().flatten() {
        if let Some(cycle) = find_cycle(next, waits, marks) {
            return Some(cycle);
        }
    }
    marks.insert(id, true);

    None
}

/// Which top level command a plan is built for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanKind {
    Build,
    Push,
}

/// Step building every given host in one go
pub fn create_build_plan(hosts: &[Host]) -> Step {
    let names: Vec<Value> = hosts.iter().map(|h| Value::from(h.name.clone())).collect();

    Step::new("build hosts", StepAction::Build).with_option("hosts", Value::Array(names))
}

/// One push step per pushable host, all depending on `build_id`
pub fn create_push_plan(build_id: &str, hosts: &[Host]) -> Step {
    let pushes = hosts.iter().filter(|host| !host.build_only).map(|host| {
        Step::new(format!("push to {}", host.name), StepAction::Push)
            .parallel(true)
            .with_option("to", host.name.clone())
            .depends_on(build_id)
    });

    Step::new("push to hosts", StepAction::None)
        .parallel(true)
        .depends_on(build_id)
        .with_steps(pushes)
}

/// Root plan for a command over `hosts`
pub fn create_plan(hosts: &[Host], kind: PlanKind) -> Step {
    let build = create_build_plan(hosts);
    let build_id = build.id.clone();

    let mut plan = Step::empty().parallel(true).with_steps([build]);
    if kind == PlanKind::Push {
        plan = plan.with_steps([create_push_plan(&build_id, hosts)]);
    }

    plan
}
