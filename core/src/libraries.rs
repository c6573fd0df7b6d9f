//! Shared-library discovery for staging.
//!
//! Groups with `pass_dl` set receive the executable's shared-library
//! dependencies in their `lib` directory. The dependency list comes from the
//! local `ldd`.

use std::path::{Path, PathBuf};

use tracing::warn;

use crate::invocation::Invocation;
use crate::runner::CommandRunner;


/// Extract library paths from `ldd` output.
///
/// ```text
///     linux-vdso.so.1 (0x00007ffc...)
///     libm.so.6 => /lib/x86_64-linux-gnu/libm.so.6 (0x00007f...)
///     /lib64/ld-linux-x86-64.so.2 (0x00007f...)
///     libfoo.so => not found
/// ```
pub fn parse_ldd_output(output: &str) -> Vec<PathBuf> {
    let mut libs = Vec::new();
    for line in output.lines() {
        let line = line.trim();
        let candidate = match line.split_once("=>") {
            Some((_, rhs)) => rhs.trim(),
            None => line,
        };
        let path = candidate.split_whitespace().next().unwrap_or("");
        if path.starts_with('/') {
            let path = PathBuf::from(path);
            if !libs.contains(&path) {
                libs.push(path);
            }
        }
    }
    libs
}

/// Shared libraries `executable` links against. Failure to run `ldd` (or a
/// static executable) yields an empty list.
pub fn shared_libraries(executable: &Path, runner: &dyn CommandRunner) -> Vec<PathBuf> {
    let inv = Invocation::new("ldd").arg(executable.to_string_lossy().into_owned());
    match runner.run(&inv) {
        Ok(result) if result.success() => parse_ldd_output(&result.output),
        Ok(result) => {
            warn!(
                executable = %executable.display(),
                output = %result.output.trim(),
                "ldd reported no dependencies"
            );
            Vec::new()
        }
        Err(e) => {
            warn!(error = %e, "cannot run ldd, shipping no shared libraries");
            Vec::new()
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::{MockRunner, RunOutput};

    const SAMPLE: &str = "\tlinux-vdso.so.1 (0x00007ffd6b1f2000)
\tlibstdc++.so.6 => /lib/x86_64-linux-gnu/libstdc++.so.6 (0x00007f1c2a200000)
\tlibm.so.6 => /lib/x86_64-linux-gnu/libm.so.6 (0x00007f1c2a119000)
\tlibmissing.so => not found
\t/lib64/ld-linux-x86-64.so.2 (0x00007f1c2a4f4000)
";

    #[test]
    fn parses_resolved_and_loader_lines() {
        let libs = parse_ldd_output(SAMPLE);
        assert_eq!(
            libs,
            vec![
                PathBuf::from("/lib/x86_64-linux-gnu/libstdc++.so.6"),
                PathBuf::from("/lib/x86_64-linux-gnu/libm.so.6"),
                PathBuf::from("/lib64/ld-linux-x86-64.so.2"),
            ]
        );
    }

    #[test]
    fn static_binary_message_yields_nothing() {
        assert!(parse_ldd_output("\tnot a dynamic executable\n").is_empty());
        assert!(parse_ldd_output("").is_empty());
    }

    #[test]
    fn ldd_runs_through_the_runner() {
        let runner = MockRunner::with_responses(vec![RunOutput::ok(SAMPLE)]);
        let libs = shared_libraries(Path::new("/build/app"), &runner);
        assert_eq!(libs.len(), 3);
        let calls = runner.invocations();
        assert_eq!(calls[0].program, "ldd");
        assert_eq!(calls[0].args, vec!["/build/app"]);
    }

    #[test]
    fn ldd_failure_ships_nothing() {
        let runner = MockRunner::with_responses(vec![RunOutput::failed(1, "\tnot a dynamic executable\n")]);
        assert!(shared_libraries(Path::new("/build/app.sh"), &runner).is_empty());
    }
}
