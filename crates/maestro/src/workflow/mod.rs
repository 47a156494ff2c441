//! Workflow planning: plan types and the planner that builds them

pub mod planner;
pub mod types;

pub use planner::{AgentSlice, TemplateStage, WorkflowPlanner, WorkflowTemplate};
pub use types::{StepMode, WorkflowPlan, WorkflowStep};
