// src/commands/vet.rs

//! The vet command: manifest lint

use anyhow::Result;

use gorpa::{vet, Settings};

use super::{get_application, GlobalArgs};

/// Exit code signalled when vet produced findings
pub const VET_EXIT_CODE: i32 = 128;

/// Runs all vet checks. Returns the process exit code.
pub async fn cmd_vet(global: &GlobalArgs, ignore_warnings: bool, settings: &Settings) -> Result<i32> {
    let app = get_application(global, settings).await?;

    let findings = vet::run(&app);
    let mut relevant = 0;
    for finding in &findings {
        if !finding.error && ignore_warnings {
            continue;
        }
        relevant += 1;
        eprintln!("{}", finding);
    }

    if relevant > 0 {
        Ok(VET_EXIT_CODE)
    } else {
        Ok(0)
    }
}
