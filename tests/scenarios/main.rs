//! Scenario-based tests for forecast-pipeline
//!
//! Every external collaborator is faked: the remote and model stores are
//! in-memory, version control is scripted, and deployments never start a
//! real process.

mod helpers;

mod commit_gate;
mod end_to_end;
mod failure_handling;
mod health_gate;
mod sync_optionality;
