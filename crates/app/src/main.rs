mod settings;
mod shell;

use snafu::ResultExt;

use settings::ClientSettings;
use shell::{SettingsSnafu, Shell, ShellError};

/// Terminal client for the document Q&A service.
///
/// Logs go to stderr so they stay out of the rendered conversation.
#[snafu::report]
#[tokio::main]
async fn main() -> Result<(), ShellError> {
    tracing_subscriber::fmt().with_writer(std::io::stderr).init();

    let settings = ClientSettings::load();
    settings.validate().context(SettingsSnafu {
        stage: "validate-settings",
    })?;
    tracing::info!(
        base_url = %settings.base_url,
        sync_documents_on_start = settings.sync_documents_on_start,
        "starting lectern"
    );

    let (shell, inbox) = Shell::connect(&settings)?;
    shell.run(inbox).await
}
