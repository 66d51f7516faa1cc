// Copyright 2025 ModerRAS
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! # Relay Agent
//!
//! Orchestration and planning core for an autonomous on-device UI agent.
//!
//! Each iteration fuses the structured UI tree with recognized screen
//! elements into a stably-identified snapshot, asks a fast planner for the
//! next steps, dispatches and verifies them, and decides when to consult a
//! slower strategic planner running in the background.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use relay_agent::device::{ReplayDevice, SnapshotVerifier};
//! use relay_agent::model::{
//!     ModelActionPlanner, ModelClient, ModelCompletionVerifier, ModelStrategicPlanner,
//! };
//! use relay_agent::{Agent, AppSettings, Collaborators};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let settings = AppSettings::load();
//!     let device = Arc::new(ReplayDevice::from_path("trace.json")?);
//!     let fast = ModelClient::new(settings.action_model());
//!
//!     let parts = Collaborators {
//!         screen: device.clone(),
//!         executor: device,
//!         verifier: Arc::new(SnapshotVerifier::new()),
//!         completion: Arc::new(ModelCompletionVerifier::new(fast.clone())),
//!         action_planner: Arc::new(ModelActionPlanner::new(fast)),
//!         strategic_planner: Arc::new(ModelStrategicPlanner::new(ModelClient::new(
//!             settings.planner_model(),
//!         ))),
//!     };
//!
//!     let outcome = Agent::new(settings.orchestrator(), parts)
//!         .run_task("Open settings and enable dark mode")
//!         .await?;
//!     println!("{}: {}", outcome.status, outcome.message);
//!     Ok(())
//! }
//! ```

pub mod actions;
pub mod agent;
pub mod benchmark;
pub mod config;
pub mod device;
pub mod fusion;
pub mod model;
pub mod planner;
pub mod settings;

pub use actions::{decode_plan, ActionKind, Plan, PlanDecode, Step};
pub use agent::{
    Agent, Collaborators, EventRecord, TaskEvent, TaskHandle, TaskOutcome, TaskStatus,
};
pub use benchmark::{BenchmarkSummary, TaskReport};
pub use config::OrchestratorConfig;
pub use fusion::{FusedStateSnapshot, FusionEngine};
pub use model::{ModelClient, ModelConfig, ModelResponse};
pub use planner::{ActionPlanner, PlanTrigger, PlanningResult, StrategicPlanner};
pub use settings::AppSettings;
