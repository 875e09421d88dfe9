use super::{Pod, discover_pods, find_pod};
use mdtf_core::cli::Invocation;
use mdtf_core::{FrameworkError, FrameworkResult};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

/// Entry point of the `run` subcommand: resolve the selected diagnostics,
/// stage a working directory per POD, and run each POD's declared driver
/// as a child process with the configuration in its environment. The exit
/// status of the first failing driver becomes the exit status of the run.
pub(crate) fn run_framework(invocation: &Invocation) -> FrameworkResult<i32> {
    let code_root = invocation.registry.code_root();
    let pods = discover_pods(code_root)?;
    let selected = select_pods(&pods, &invocation.config.get_str_list("pods"))?;
    if selected.is_empty() {
        println!("no diagnostics selected; nothing to run");
        return Ok(0);
    }

    // Validation runs unconditionally so a broken POD surfaces even when
    // execution is skipped.
    for pod in &selected {
        let driver = pod.driver_path();
        if !driver.is_file() {
            return Err(FrameworkError::config_missing(
                "RUN.DRIVER_MISSING",
                format!(
                    "diagnostic '{}' declares missing driver '{}'",
                    pod.name,
                    driver.display()
                ),
            ));
        }
    }

    if invocation.config.get_bool("dry_run") || invocation.config.get_bool("test_mode") {
        for pod in &selected {
            println!("would run {} ({})", pod.name, pod.driver_path().display());
        }
        return Ok(0);
    }

    let output_dir = output_dir(invocation);
    let environment = framework_environment(invocation);
    let mut first_failure = 0;
    for pod in &selected {
        println!("running {}...", pod.name);
        let status = run_pod_driver(pod, &output_dir, &environment)?;
        if status != 0 {
            tracing::error!(pod = %pod.name, status, "driver exited with a failure");
            if first_failure == 0 {
                first_failure = status;
            }
        }
    }
    if first_failure == 0 {
        println!("all {} diagnostics completed", selected.len());
    }
    Ok(first_failure)
}

fn output_dir(invocation: &Invocation) -> PathBuf {
    match invocation.config.get_str("output_dir") {
        Some(dir) => PathBuf::from(dir),
        None => invocation.registry.code_root().join("wkdir"),
    }
}

fn select_pods<'a>(pods: &'a [Pod], requested: &[String]) -> FrameworkResult<Vec<&'a Pod>> {
    if requested.is_empty() {
        return Ok(pods.iter().collect());
    }
    let mut selected = Vec::with_capacity(requested.len());
    for name in requested {
        let Some(pod) = find_pod(pods, name) else {
            let available: Vec<&str> = pods.iter().map(|pod| pod.name.as_str()).collect();
            return Err(FrameworkError::config_missing(
                "RUN.UNKNOWN_POD",
                format!(
                    "no diagnostic named '{}'; available: {}",
                    name,
                    available.join(", ")
                ),
            ));
        };
        selected.push(pod);
    }
    Ok(selected)
}

/// The resolved configuration flattened into `MDTF_`-prefixed variables
/// for the driver process: strings go through verbatim, everything else as
/// JSON, and null values are not exported.
fn framework_environment(invocation: &Invocation) -> Vec<(String, String)> {
    let mut variables = Vec::with_capacity(invocation.config.len());
    for (dest, value) in invocation.config.values() {
        let rendered = match value {
            Value::Null => continue,
            Value::String(text) => text.clone(),
            other => other.to_string(),
        };
        variables.push((format!("MDTF_{}", dest.to_uppercase()), rendered));
    }
    variables
}

fn run_pod_driver(
    pod: &Pod,
    output_dir: &Path,
    environment: &[(String, String)],
) -> FrameworkResult<i32> {
    let work_dir = output_dir.join(&pod.name);
    fs::create_dir_all(&work_dir).map_err(|source| {
        FrameworkError::io_system(
            "IO.WORK_DIR",
            format!("failed to create '{}': {}", work_dir.display(), source),
        )
    })?;

    let driver = pod.driver_path();
    let status = Command::new(&pod.settings.runtime)
        .arg(&driver)
        .current_dir(&work_dir)
        .env("MDTF_POD_NAME", &pod.name)
        .env("MDTF_POD_DIR", &pod.dir)
        .env("MDTF_POD_WORK_DIR", &work_dir)
        .envs(environment.iter().map(|(key, value)| (key.as_str(), value.as_str())))
        .status()
        .map_err(|source| {
            FrameworkError::io_system(
                "RUN.DRIVER_SPAWN",
                format!("failed to run the driver for '{}': {}", pod.name, source),
            )
        })?;
    Ok(status.code().unwrap_or(1))
}
