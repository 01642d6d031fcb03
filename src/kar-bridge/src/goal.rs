//! Slot goal evaluation.

use std::collections::{BTreeMap, BTreeSet};
use tracing::{info, warn};

/// Goal option text for the configurable box count
pub const GOAL_N_BOXES: &str = "Fill in N Checklist Boxes!";
/// Goal option text for the default 100-box goal
pub const GOAL_100_BOXES: &str = "Fill in over 100 Checklist blocks!";
pub const GOAL_HYDRA_AND_DRAGOON: &str = "In one match, complete both Dragoon and Hydra!";
pub const GOAL_BEAT_KING_DEDEDE: &str =
    "Stadium: VS. KING DEDEDE KO King Dedede in less than a minute!";

/// Goal options that are themselves checklist boxes, by location id
pub const GOAL_LOCATIONS: &[(&str, i64)] = &[
    (GOAL_HYDRA_AND_DRAGOON, 60),
    (GOAL_BEAT_KING_DEDEDE, 95),
];

/// Built-in goal location names
pub fn builtin_goal_locations() -> BTreeMap<String, i64> {
    GOAL_LOCATIONS
        .iter()
        .map(|(name, id)| (name.to_string(), *id))
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Goal {
    /// Done once this many boxes have been reported this session
    ChecklistCount(usize),
    /// Done once this box is reported
    Location(i64),
    /// A goal the client cannot observe; never completes
    Unsupported(String),
}

impl Goal {
    /// Interpret the `goal` and `checklist_amount` slot data fields.
    ///
    /// Any other goal is a location: looked up by name in `locations`, or
    /// given directly as a numeric id.
    pub fn from_slot_data(
        goal: &str,
        checklist_amount: Option<usize>,
        locations: &BTreeMap<String, i64>,
    ) -> Goal {
        match goal {
            GOAL_N_BOXES => Goal::ChecklistCount(checklist_amount.unwrap_or(100)),
            GOAL_100_BOXES => Goal::ChecklistCount(100),
            other => {
                let name = other.trim();
                if let Some(id) = locations.get(name) {
                    return Goal::Location(*id);
                }
                match name.parse::<i64>() {
                    Ok(id) => Goal::Location(id),
                    Err(_) => Goal::Unsupported(other.to_string()),
                }
            }
        }
    }

    fn is_met(&self, checked: &BTreeSet<i64>) -> bool {
        match self {
            Goal::ChecklistCount(n) => checked.len() >= *n,
            Goal::Location(id) => checked.contains(id),
            Goal::Unsupported(_) => false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct GoalTracker {
    goal: Option<Goal>,
    reached: bool,
    locations: BTreeMap<String, i64>,
}

impl Default for GoalTracker {
    fn default() -> Self {
        Self {
            goal: None,
            reached: false,
            locations: builtin_goal_locations(),
        }
    }
}

impl GoalTracker {
    /// Add or replace goal location names
    pub fn add_locations(&mut self, locations: impl IntoIterator<Item = (String, i64)>) {
        self.locations.extend(locations);
    }

    pub fn locations(&self) -> &BTreeMap<String, i64> {
        &self.locations
    }

    /// Set the goal from slot data using the known location names
    pub fn set_from_slot_data(&mut self, goal: &str, checklist_amount: Option<usize>) {
        let goal = Goal::from_slot_data(goal, checklist_amount, &self.locations);
        self.set_goal(goal);
    }

    pub fn set_goal(&mut self, goal: Goal) {
        if let Goal::Unsupported(name) = &goal {
            warn!(goal = %name, "goal cannot be tracked by this client");
        }
        self.goal = Some(goal);
    }

    pub fn goal(&self) -> Option<&Goal> {
        self.goal.as_ref()
    }

    pub fn is_reached(&self) -> bool {
        self.reached
    }

    /// True exactly once, on the call where the goal first holds
    pub fn evaluate(&mut self, checked: &BTreeSet<i64>) -> bool {
        if self.reached {
            return false;
        }
        let Some(goal) = &self.goal else {
            return false;
        };
        if goal.is_met(checked) {
            info!(?goal, "goal reached");
            self.reached = true;
            return true;
        }
        false
    }
}
