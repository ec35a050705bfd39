use std::process::Command;

fn command_output(program: &str, args: &[&str]) -> Option<String> {
    let output = Command::new(program).args(args).output().ok()?;
    if !output.status.success() {
        return None;
    }
    let value = String::from_utf8_lossy(&output.stdout).trim().to_string();
    (!value.is_empty()).then_some(value)
}

fn main() {
    println!("cargo:rerun-if-changed=../../.git/HEAD");
    println!("cargo:rerun-if-env-changed=SOURCE_DATE_EPOCH");

    if let Some(commit) = command_output("git", &["rev-parse", "--short", "HEAD"]) {
        println!("cargo:rustc-env=SPRINTS_GIT_COMMIT={commit}");
    }

    if let Some(branch) = command_output("git", &["rev-parse", "--abbrev-ref", "HEAD"]) {
        println!("cargo:rustc-env=SPRINTS_GIT_BRANCH={branch}");
    }

    // Reproducible builds pin the timestamp through SOURCE_DATE_EPOCH.
    let timestamp = match std::env::var("SOURCE_DATE_EPOCH") {
        Ok(epoch) => command_output("date", &["-u", "-d", &format!("@{epoch}"), "+%Y-%m-%dT%H:%M:%SZ"]),
        Err(_) => command_output("date", &["-u", "+%Y-%m-%dT%H:%M:%SZ"]),
    };
    if let Some(timestamp) = timestamp {
        println!("cargo:rustc-env=SPRINTS_BUILD_TIMESTAMP={timestamp}");
    }
}
