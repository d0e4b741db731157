// SPDX-License-Identifier: MIT

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! fm-adapters: thin abstraction over the container runtime.
//!
//! One capability set — ensure image, create, start, exec, stop, list,
//! inspect — behind the [`ContainerRuntime`] trait. The production
//! implementation drives the `docker` CLI; a scripted [`FakeRuntime`] backs
//! the engine's tests.

pub mod docker;
pub mod runtime;
pub mod subprocess;

#[cfg(any(test, feature = "test-support"))]
pub mod fake;

pub use docker::DockerCli;
pub use runtime::{
    CallOpts, ContainerInfo, ContainerRuntime, ContainerSummary, CreateSpec, ExecEvent,
    ExecOutput, ExecSession, RuntimeError,
};

#[cfg(any(test, feature = "test-support"))]
pub use fake::{FakeRuntime, WorkerScript, WorkerStep};
