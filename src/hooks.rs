//! Extension hooks
//!
//! Third-party packages extend the platform by dropping scripts into
//! `<hooks-dir>/<action>/`. Invoking an action runs every script bound to
//! it, in lexicographic order, best-effort: one failing script does not
//! stop the others, but every failure is reported back.

use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::core::error::{Error, Result};
use crate::exec::{self, SystemBinary};
use crate::validators::validate_action_name;

/// What a callback pass did.
#[derive(Debug, Default)]
pub struct CallbackOutcome {
    /// Scripts that ran to completion successfully.
    pub executed: usize,
    /// Failure descriptions, one per script that did not.
    pub failures: Vec<String>,
}

/// Copies `script` into the action's hook directory.
pub fn add(hooks_dir: &Path, action: &str, script: &Path) -> Result<PathBuf> {
    validate_action_name(action)?;
    if !script.is_file() {
        return Err(Error::invalid(
            "hook",
            format!("no such hook script: {}", script.display()),
        ));
    }
    let file_name = script
        .file_name()
        .ok_or_else(|| Error::invalid("hook", "script path has no file name"))?;

    let action_dir = hooks_dir.join(action);
    std::fs::create_dir_all(&action_dir)?;

    let target = action_dir.join(file_name);
    std::fs::copy(script, &target)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&target, std::fs::Permissions::from_mode(0o755))?;
    }

    info!("hook installed: {}", target.display());
    Ok(target)
}

/// Lists the scripts bound to `action`, in execution order.
pub fn list(hooks_dir: &Path, action: &str) -> Result<Vec<String>> {
    validate_action_name(action)?;
    let action_dir = hooks_dir.join(action);
    if !action_dir.is_dir() {
        return Ok(Vec::new());
    }

    let mut scripts = Vec::new();
    for entry in std::fs::read_dir(action_dir)? {
        let entry = entry?;
        if entry.path().is_file()
            && let Ok(name) = entry.file_name().into_string()
        {
            scripts.push(name);
        }
    }
    scripts.sort();
    Ok(scripts)
}

/// Executes every script bound to `action`, in lexicographic order.
pub fn callback(hooks_dir: &Path, action: &str) -> Result<CallbackOutcome> {
    let mut outcome = CallbackOutcome::default();
    let action_dir = hooks_dir.join(action);

    for name in list(hooks_dir, action)? {
        let script = action_dir.join(&name);
        match exec_script(&script, &[]) {
            Ok(()) => outcome.executed += 1,
            Err(e) => {
                warn!("hook {name} failed: {e}");
                outcome.failures.push(format!("{name}: {e}"));
            }
        }
    }
    Ok(outcome)
}

/// Executes a single hook script with positional arguments.
pub fn exec_script(script: &Path, args: &[String]) -> Result<()> {
    if !script.is_file() {
        return Err(Error::invalid(
            "hook",
            format!("no such hook script: {}", script.display()),
        ));
    }
    let script_path = script.to_string_lossy();
    let mut cmd_args: Vec<&str> = vec![script_path.as_ref()];
    cmd_args.extend(args.iter().map(String::as_str));
    exec::run_checked(SystemBinary::Bash, &cmd_args)
}
