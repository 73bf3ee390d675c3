//! Execution ordering.
//!
//! Orders compiled plans so that every referenced object is processed
//! before the objects referencing it, masters strictly before their
//! details, and record types first. Each task then records, per reference
//! field, whether its parent runs before or after it.

use super::plan::{ObjectGraph, ObjectPlan};
use crate::error::{Error, Result};
use std::collections::{HashMap, HashSet, VecDeque};
use tracing::{debug, info};

/// Where a reference field's parent runs relative to the task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkPosition {
    /// The parent is written first; resolved in the forward write pass.
    Before,
    /// The parent is written later, or is the object itself; resolved in
    /// the backward write pass.
    After,
}

/// A synthetic column carrying a parent's external id for a reference field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerivedField {
    /// The reference field, e.g. `Account__c`.
    pub field: String,
    /// The lookup column, e.g. `Account__r.Code__c`.
    pub lookup_column: String,
    /// The referenced object.
    pub parent: String,
    /// External id column of the referenced object.
    pub parent_external_id: String,
    pub position: LinkPosition,
    /// The reference points at the task's own object.
    pub is_self: bool,
}

/// One execution unit bound to an object plan.
#[derive(Debug, Clone)]
pub struct Task {
    pub object: String,
    /// Fields literally projected by the object's query.
    pub original_fields: Vec<String>,
    /// Lookup columns, one per reference field.
    pub derived_fields: Vec<DerivedField>,
}

impl Task {
    /// Derived fields resolved in the forward pass.
    pub fn before_fields(&self) -> impl Iterator<Item = &DerivedField> {
        self.derived_fields
            .iter()
            .filter(|d| d.position == LinkPosition::Before)
    }

    /// Derived fields resolved in the backward pass.
    pub fn after_fields(&self) -> impl Iterator<Item = &DerivedField> {
        self.derived_fields
            .iter()
            .filter(|d| d.position == LinkPosition::After)
    }
}

/// The ordered tasks of one run plus the plans they are bound to.
///
/// `plans[i]` is the plan of `tasks[i]`.
#[derive(Debug, Clone)]
pub struct Job {
    pub tasks: Vec<Task>,
    pub plans: Vec<ObjectPlan>,
}

impl Job {
    /// Object names in execution order.
    pub fn execution_order(&self) -> Vec<&str> {
        self.tasks.iter().map(|t| t.object.as_str()).collect()
    }

    /// Position of an object's task.
    pub fn position(&self, object: &str) -> Option<usize> {
        self.tasks.iter().position(|t| t.object == object)
    }

    /// Plan of the task at `index`.
    pub fn plan(&self, index: usize) -> &ObjectPlan {
        &self.plans[index]
    }

    /// Plan of an object.
    pub fn plan_of(&self, object: &str) -> Option<&ObjectPlan> {
        self.position(object).map(|i| &self.plans[i])
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

/// Turns an object graph into an ordered job.
pub struct TaskPlanner;

impl TaskPlanner {
    /// Plan the execution order.
    pub fn plan(graph: ObjectGraph) -> Result<Job> {
        let dependents = dependents_index(&graph);

        let mut record_type: Option<String> = None;
        let mut working: Vec<String> = Vec::with_capacity(graph.len());
        for plan in graph.iter() {
            if plan.is_record_type() {
                record_type = Some(plan.name.clone());
                continue;
            }
            let depends_on_this = transitive_dependents(&plan.name, &dependents);
            let index = working
                .iter()
                .rposition(|t| depends_on_this.contains(t))
                .map_or(0, |i| i + 1);
            working.insert(index, plan.name.clone());
        }

        Self::correct_master_detail(&graph, &mut working);

        working.reverse();
        if let Some(record_type) = record_type {
            working.insert(0, record_type);
        }

        let positions: HashMap<&str, usize> = working
            .iter()
            .enumerate()
            .map(|(i, name)| (name.as_str(), i))
            .collect();

        let mut tasks = Vec::with_capacity(working.len());
        let mut plans = Vec::with_capacity(working.len());
        for (index, name) in working.iter().enumerate() {
            let plan = graph
                .get(name)
                .ok_or_else(|| Error::Plan(format!("unknown object {name}")))?;
            let mut derived_fields = Vec::new();
            for field in plan.reference_fields() {
                let (Some(parent), Some(lookup_column), Some(parent_external_id)) = (
                    field.reference_to.clone(),
                    field.lookup_column(),
                    field.parent_external_id.clone(),
                ) else {
                    return Err(Error::Plan(format!(
                        "{name}.{} is not bound to an external id",
                        field.name
                    )));
                };
                let parent_index = *positions.get(parent.as_str()).ok_or_else(|| {
                    Error::Plan(format!("{name}.{} references unplanned {parent}", field.name))
                })?;
                let position = if parent_index < index {
                    LinkPosition::Before
                } else {
                    LinkPosition::After
                };
                derived_fields.push(DerivedField {
                    field: field.name.clone(),
                    lookup_column,
                    is_self: parent == *name,
                    parent,
                    parent_external_id,
                    position,
                });
            }
            tasks.push(Task {
                object: name.clone(),
                original_fields: plan.query.fields.clone(),
                derived_fields,
            });
            plans.push(plan.clone());
        }

        info!(order = ?working, "execution order planned");
        Ok(Job { tasks, plans })
    }

    /// Move every detail directly after its master in execution order.
    ///
    /// `working` is in reverse execution order: a detail sits at a lower
    /// index than its master and is moved to the slot right in front of
    /// it. Sibling details of the same master may share that run of
    /// slots. Repeats until nothing moves.
    fn correct_master_detail(graph: &ObjectGraph, working: &mut Vec<String>) {
        for _ in 0..=working.len() {
            let mut moved = false;
            for i in (0..working.len()).rev() {
                let Some(plan) = graph.get(&working[i]) else {
                    continue;
                };
                let Some(master) = (i + 1..working.len()).find(|&j| plan.is_detail_of(&working[j]))
                else {
                    continue;
                };
                let master_name = working[master].clone();
                let settled = working[i + 1..master]
                    .iter()
                    .all(|t| graph.get(t).is_some_and(|p| p.is_detail_of(&master_name)));
                if settled {
                    continue;
                }
                let detail = working.remove(i);
                debug!(detail = %detail, master = %master_name, "detail moved after master");
                working.insert(master - 1, detail);
                moved = true;
            }
            if !moved {
                break;
            }
        }
    }
}

/// Object name to the objects referencing it directly.
fn dependents_index(graph: &ObjectGraph) -> HashMap<String, Vec<String>> {
    let mut index: HashMap<String, Vec<String>> = HashMap::new();
    for plan in graph.iter() {
        for parent in &plan.referenced_objects {
            if *parent != plan.name {
                index.entry(parent.clone()).or_default().push(plan.name.clone());
            }
        }
    }
    index
}

/// Every object that references `object`, directly or through others.
fn transitive_dependents(object: &str, index: &HashMap<String, Vec<String>>) -> HashSet<String> {
    let mut seen = HashSet::new();
    let mut queue: VecDeque<&str> = VecDeque::from([object]);
    while let Some(current) = queue.pop_front() {
        for child in index.get(current).into_iter().flatten() {
            if child != object && seen.insert(child.clone()) {
                queue.push_back(child);
            }
        }
    }
    seen
}
