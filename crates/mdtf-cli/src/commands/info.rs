use super::{Pod, discover_pods, find_pod};
use mdtf_core::FrameworkResult;
use mdtf_core::cli::Invocation;

/// Entry point of the `info` subcommand: list the installed diagnostics,
/// or describe the ones named on the command line.
pub(crate) fn print_info(invocation: &Invocation) -> FrameworkResult<i32> {
    let pods = discover_pods(invocation.registry.code_root())?;
    let requested = invocation.config.get_str_list("pods");

    if requested.is_empty() {
        if pods.is_empty() {
            println!("no diagnostics installed");
            return Ok(0);
        }
        println!("{} diagnostics installed:", pods.len());
        for pod in &pods {
            println!("  {}", summary_line(pod));
        }
        return Ok(0);
    }

    let mut missing = false;
    for name in &requested {
        match find_pod(&pods, name) {
            Some(pod) => print_details(pod),
            None => {
                eprintln!("no diagnostic named '{name}'");
                missing = true;
            }
        }
    }
    Ok(if missing { 1 } else { 0 })
}

fn summary_line(pod: &Pod) -> String {
    if pod.settings.long_name.is_empty() {
        pod.name.clone()
    } else {
        format!("{}: {}", pod.name, pod.settings.long_name)
    }
}

fn print_details(pod: &Pod) {
    println!("{}", summary_line(pod));
    if !pod.settings.realm.is_empty() {
        println!("  realm:   {}", pod.settings.realm);
    }
    println!("  driver:  {}", pod.driver_path().display());
    println!("  runtime: {}", pod.settings.runtime);
}
