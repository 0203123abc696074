//! Command handlers for the kracli CLI

use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use anyhow::Result;
use clap::Command;
use clap_complete::{generate, Shell};
use kracli_core::config::EndpointsConfig;
use kracli_core::upload::{resume_command, whole_file_command};
use kracli_core::{
    until_cancelled, ApiGateway, ConfigCredentials, ConfigFile, CopyObject, CreateObject,
    DeleteObject, DownloadEngine, DownloadEvent, HttpTransport, ListQuery, ObjectApi,
    SessionStore, Transport, UpdateObject, UploadEngine, UploadEvent, UploadRequest,
};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::exit_code::ExitCode;
use crate::output::{self, OutputConfig, ProgressBar};
use crate::prompt::{self, PromptingCredentials};

/// Everything a handler needs: endpoints, the session store and the interrupt token
pub struct Context {
    gateway: ApiGateway,
    transport: Arc<dyn Transport>,
    store: SessionStore,
    config_path: PathBuf,
    endpoints: EndpointsConfig,
    output: OutputConfig,
    cancel: CancellationToken,
}

impl Context {
    pub fn new(
        config: ConfigFile,
        config_path: PathBuf,
        output: OutputConfig,
        cancel: CancellationToken,
    ) -> Self {
        let transport: Arc<dyn Transport> = Arc::new(HttpTransport::new());
        let endpoints = config.endpoints();
        let gateway = ApiGateway::new(transport.clone(), endpoints.api.clone());
        let store = SessionStore::new(gateway.clone(), config_path.clone(), config);

        Self {
            gateway,
            transport,
            store,
            config_path,
            endpoints,
            output,
            cancel,
        }
    }

    /// Valid session token, logging in when needed; abandoned on interrupt
    async fn session(&mut self) -> Result<String> {
        let config = self.store.config().clone();
        let stored = ConfigCredentials::new(&config, &self.config_path);
        let provider = PromptingCredentials::new(stored, prompt::is_interactive());

        let cancel = self.cancel.clone();
        let token = until_cancelled(&cancel, self.store.ensure_session(&provider)).await?;
        Ok(token)
    }
}

/// Handle `--list`
pub async fn handle_list(ctx: &mut Context, query: ListQuery) -> Result<ExitCode> {
    let token = ctx.session().await?;
    let objects = ObjectApi::new(&ctx.gateway, &token);
    let reply = until_cancelled(&ctx.cancel, objects.list(&query)).await?;
    output::print_envelope(&reply)
}

/// Handle `--objectinfo`
pub async fn handle_objectinfo(ctx: &mut Context, ident: &str) -> Result<ExitCode> {
    let token = ctx.session().await?;
    let objects = ObjectApi::new(&ctx.gateway, &token);
    let reply = until_cancelled(&ctx.cancel, objects.info(ident)).await?;
    output::print_envelope(&reply)
}

/// Handle `--create`
pub async fn handle_create(ctx: &mut Context, object: CreateObject) -> Result<ExitCode> {
    let token = ctx.session().await?;
    let objects = ObjectApi::new(&ctx.gateway, &token);
    let reply = until_cancelled(&ctx.cancel, objects.create(&object)).await?;
    output::print_envelope(&reply)
}

/// Handle `--copy`
pub async fn handle_copy(ctx: &mut Context, copy: CopyObject) -> Result<ExitCode> {
    let token = ctx.session().await?;
    let objects = ObjectApi::new(&ctx.gateway, &token);
    let reply = until_cancelled(&ctx.cancel, objects.copy(&copy)).await?;
    output::print_envelope(&reply)
}

/// Handle `--remove`
pub async fn handle_remove(ctx: &mut Context, delete: DeleteObject) -> Result<ExitCode> {
    let token = ctx.session().await?;
    let objects = ObjectApi::new(&ctx.gateway, &token);
    let reply = until_cancelled(&ctx.cancel, objects.delete(&delete)).await?;
    output::print_envelope(&reply)
}

/// Handle `--edit`
pub async fn handle_edit(ctx: &mut Context, update: UpdateObject) -> Result<ExitCode> {
    let token = ctx.session().await?;
    let objects = ObjectApi::new(&ctx.gateway, &token);
    let reply = until_cancelled(&ctx.cancel, objects.update(&update)).await?;
    output::print_envelope(&reply)
}

/// Handle `--userinfo`; reuses the account fetched while validating the session
pub async fn handle_userinfo(ctx: &mut Context) -> Result<ExitCode> {
    let token = ctx.session().await?;
    let reply = until_cancelled(&ctx.cancel, ctx.store.account_info(&token)).await?;
    output::print_envelope(&reply)
}

/// Handle `--download`
pub async fn handle_download(
    ctx: &mut Context,
    ident: &str,
    name: Option<String>,
    resume: bool,
) -> Result<ExitCode> {
    let token = ctx.session().await?;
    let objects = ObjectApi::new(&ctx.gateway, &token);
    let engine = DownloadEngine::new(&objects, ctx.transport.clone(), ctx.cancel.clone());

    let bar: OnceLock<ProgressBar> = OnceLock::new();
    let output = ctx.output;
    let on_event = |event: DownloadEvent<'_>| match event {
        DownloadEvent::Started {
            dest,
            offset,
            total,
        } => {
            println!("Downloading {} as: {}", ident, dest.display());
            if offset > 0 {
                println!("Resuming from position {}", offset);
            }
            bar.get_or_init(|| ProgressBar::new(output, total))
                .set_position(offset);
        }
        DownloadEvent::Progress { position } => {
            if let Some(bar) = bar.get() {
                bar.set_position(position);
            }
        }
        DownloadEvent::Complete { .. } => {
            if let Some(bar) = bar.get() {
                bar.finish_and_clear();
            }
        }
    };

    let result = engine
        .download(ident, name.map(PathBuf::from), resume, &on_event)
        .await;
    if let Some(bar) = bar.get() {
        bar.finish_and_clear();
    }

    let report = result?;
    debug!(dest = %report.dest.display(), written = report.written, "download done");
    Ok(ExitCode::Success)
}

/// Resume and restart hints printed when the transfer starts
fn upload_hints(path: &Path, resource: &str, offset: u64, chunk_mb: i64) -> Vec<String> {
    if chunk_mb <= 0 {
        return vec![
            "Starting whole-file upload".to_string(),
            format!(
                "You can restart chunked upload with:\n{}",
                resume_command(path, resource)
            ),
        ];
    }

    let start = if offset == 0 {
        format!("Starting upload with {}MB chunks", chunk_mb)
    } else {
        format!(
            "Resuming upload with {}MB chunks from position {}",
            chunk_mb, offset
        )
    };
    vec![
        start,
        format!("You can resume upload with:\n{}", resume_command(path, resource)),
        format!(
            "You can finish in one request with:\n{}",
            whole_file_command(path, resource)
        ),
    ]
}

/// Handle `--upload`
pub async fn handle_upload(
    ctx: &mut Context,
    request: UploadRequest,
    chunk_mb: i64,
) -> Result<ExitCode> {
    let token = ctx.session().await?;
    let objects = ObjectApi::new(&ctx.gateway, &token);
    let engine = UploadEngine::new(
        &objects,
        ctx.transport.clone(),
        ctx.endpoints.upload.clone(),
        ctx.cancel.clone(),
    );

    let bar: OnceLock<ProgressBar> = OnceLock::new();
    let output = ctx.output;
    let path = request.path.as_path();
    let on_event = |event: UploadEvent<'_>| match event {
        UploadEvent::Created { ident } => println!("Created ident: {}", ident),
        UploadEvent::Negotiated { resource } => debug!(resource, "upload resource assigned"),
        UploadEvent::Started {
            resource,
            offset,
            size,
            ..
        } => {
            for line in upload_hints(path, resource, offset, chunk_mb) {
                println!("{}", line);
            }
            bar.get_or_init(|| ProgressBar::new(output, Some(size)))
                .set_position(offset);
        }
        UploadEvent::Acknowledged { offset, .. } => {
            if let Some(bar) = bar.get() {
                bar.set_position(offset);
            }
        }
        UploadEvent::Complete { .. } => {
            if let Some(bar) = bar.get() {
                bar.finish_and_clear();
            }
        }
    };

    let result = engine.run(&request, &on_event).await;
    if let Some(bar) = bar.get() {
        bar.finish_and_clear();
    }

    let report = result?;
    debug!(resource = %report.resource, writes = report.writes, "upload done");
    println!("Upload successful");
    Ok(ExitCode::Success)
}

/// Handle shell completion generation
pub fn handle_completion(shell: Shell, cmd: &mut Command) -> Result<ExitCode> {
    let name = cmd.get_name().to_string();
    generate(shell, cmd, name.as_str(), &mut std::io::stdout());

    let hint = match shell {
        Shell::Bash => format!("# Add to your ~/.bashrc:\n#   source <({} --completion bash)", name),
        Shell::Zsh => format!(
            "# Save to a directory in $fpath:\n#   {} --completion zsh > ~/.zsh/completion/_{}",
            name, name
        ),
        Shell::Fish => format!(
            "# Save to:\n#   {} --completion fish > ~/.config/fish/completions/{}.fish",
            name, name
        ),
        Shell::PowerShell => format!(
            "# Run in PowerShell:\n#   {} --completion powershell | Out-String | Invoke-Expression",
            name
        ),
        _ => String::new(),
    };
    if !hint.is_empty() {
        eprintln!("{}", hint);
    }

    Ok(ExitCode::Success)
}
