use tracing::info;

use crate::backend::Notes;
use crate::error::CliError;

pub async fn run_reset(confirmed: bool, notes: &Notes) -> Result<(), CliError> {
    if !confirmed {
        return Err(CliError::ConfirmationRequired);
    }

    let coordinator = notes.coordinator();
    let discarded = coordinator.refresh_pending()?;
    coordinator.sign_out().await?;

    info!("Discarded {discarded} queued changes");
    println!("Local cache cleared");
    Ok(())
}
