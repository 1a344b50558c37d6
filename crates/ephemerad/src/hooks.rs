//! Resource host backed by external hook commands
//!
//! Each hook is an argv list from the config. The resource id and notice
//! kind are appended, so a hook runs as e.g.
//! `notify-chat --channel ops <resource-id> warning 300`.

use async_trait::async_trait;
use ephemera_api::NoticeKind;
use ephemera_config::HookConfig;
use ephemera_host_api::{HostError, HostResult, ResourceHost};
use ephemera_util::ResourceId;
use tokio::process::Command;
use tracing::{debug, info};

pub struct HookHost {
    notify: Option<Vec<String>>,
    destroy: Option<Vec<String>>,
}

impl HookHost {
    pub fn new(hooks: &HookConfig) -> Self {
        for (name, hook) in [("notify", &hooks.notify), ("destroy", &hooks.destroy)] {
            match hook {
                Some(argv) => info!(hook = name, command = %argv.join(" "), "Hook configured"),
                None => info!(hook = name, "No hook configured, calls will only be logged"),
            }
        }

        Self {
            notify: hooks.notify.clone(),
            destroy: hooks.destroy.clone(),
        }
    }
}

/// Arguments appended to the notify hook
fn notice_args(id: &ResourceId, kind: NoticeKind) -> Vec<String> {
    let mut args = vec![id.as_str().to_string(), kind.as_str().to_string()];
    if let NoticeKind::Warning { seconds_before } = kind {
        args.push(seconds_before.to_string());
    }
    args
}

/// Run `argv` followed by `extra`. Non-zero exit is reported with stderr.
async fn run_hook(argv: &[String], extra: &[String]) -> HostResult<Result<(), String>> {
    let Some((program, args)) = argv.split_first() else {
        return Err(HostError::Internal("empty hook command".into()));
    };

    let output = Command::new(program)
        .args(args)
        .args(extra)
        .kill_on_drop(true)
        .output()
        .await?;

    if output.status.success() {
        debug!(program = %program, "Hook succeeded");
        return Ok(Ok(()));
    }

    let stderr = String::from_utf8_lossy(&output.stderr);
    Ok(Err(format!("{} exited with {}: {}", program, output.status, stderr.trim())))
}

#[async_trait]
impl ResourceHost for HookHost {
    async fn notify(&self, id: &ResourceId, kind: NoticeKind) -> HostResult<()> {
        let Some(argv) = &self.notify else {
            info!(resource_id = %id, notice = %kind, "Notice");
            return Ok(());
        };

        run_hook(argv, &notice_args(id, kind))
            .await?
            .map_err(HostError::NotifyFailed)
    }

    async fn destroy(&self, id: &ResourceId) -> HostResult<()> {
        let Some(argv) = &self.destroy else {
            info!(resource_id = %id, "Destroy requested, no hook configured");
            return Ok(());
        };

        run_hook(argv, &[id.as_str().to_string()])
            .await?
            .map_err(HostError::DestroyFailed)
    }
}
