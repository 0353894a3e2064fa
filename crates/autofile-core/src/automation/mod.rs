//! OS automation - open files, detect whether they are open, close them.
//!
//! The pipeline talks to the desktop only through [`AutomationBackend`].
//! [`system::SystemAutomation`] implements it with the platform's own tools;
//! tests use an in-memory fake.
//!
//! Window detection matches on title substrings. Two windows whose titles both
//! contain the file name are indistinguishable, which is accepted: the OS tools
//! expose no stable window identity besides the title.

pub mod controller;
pub mod strategy;
pub mod system;

pub use controller::{ActionAttempt, AppController, CloseReport, FileState, OpenReport};
pub use strategy::{CloseAction, StrategyTable};
pub use system::SystemAutomation;

use crate::error::Result;
use async_trait::async_trait;
use std::path::Path;

/// Blocking, slow and occasionally unreliable desktop primitives.
#[async_trait]
pub trait AutomationBackend: Send + Sync {
    fn name(&self) -> &str;

    /// Hand the file to the platform's default handler. Returns once the
    /// launch request is accepted, not when the document is loaded.
    async fn launch_default(&self, path: &Path) -> Result<()>;

    /// Names of processes owning a window whose title contains `needle`.
    async fn query_windows_by_title(&self, needle: &str) -> Result<Vec<String>>;

    async fn process_running(&self, process: &str) -> Result<bool>;

    /// Run one close action against `app`. `title` is the window-title
    /// substring to target; coarse actions ignore it.
    async fn run_app_action(&self, app: &str, action: CloseAction, title: &str) -> bool;

    async fn terminate(&self, process: &str) -> bool;
}
