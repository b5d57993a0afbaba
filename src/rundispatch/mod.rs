//! Run Dispatcher: maps a file extension to the command line used to
//! compile and/or run it.

use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RunDispatchError {
    #[error("unknown extension: {0}")]
    UnknownExtension(String),
}

/// Returns the shell command line to compile/run `path`, or
/// [`RunDispatchError::UnknownExtension`] if its extension has no template.
pub fn command_for(path: &str) -> Result<String, RunDispatchError> {
    let leaf = Path::new(path)
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.to_string());
    let extension = Path::new(path).extension().map(|e| e.to_string_lossy().to_string());
    let basename = Path::new(&leaf).file_stem().map(|s| s.to_string_lossy().to_string()).unwrap_or_else(|| leaf.clone());

    let command = match extension.as_deref() {
        Some("js") => format!("node {path}"),
        Some("py") => format!("python {path}"),
        Some("java") => format!("javac {path} && java {basename}"),
        Some("cpp") => format!("g++ {path} -o {basename} && ./{basename}"),
        Some("c") => format!("gcc {path} -o {basename} && ./{basename}"),
        Some("go") => format!("go run {path}"),
        Some("rs") => format!("rustc {path} && ./{basename}"),
        Some("php") => format!("php {path}"),
        Some("rb") => format!("ruby {path}"),
        Some("sh") => format!("bash {path}"),
        Some("ps1") => format!("powershell {path}"),
        _ => return Err(RunDispatchError::UnknownExtension(extension.unwrap_or_default())),
    };

    Ok(command)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_js_command() {
        assert_eq!(command_for("src/main.js").unwrap(), "node src/main.js");
    }

    #[test]
    fn test_cpp_command_uses_basename() {
        assert_eq!(command_for("main.cpp").unwrap(), "g++ main.cpp -o main && ./main");
    }

    #[test]
    fn test_rust_command() {
        assert_eq!(command_for("app.rs").unwrap(), "rustc app.rs && ./app");
    }

    #[test]
    fn test_unknown_extension_errors() {
        let err = command_for("data.xyz").unwrap_err();
        assert!(matches!(err, RunDispatchError::UnknownExtension(_)));
    }

    #[test]
    fn test_no_extension_errors() {
        let err = command_for("Makefile").unwrap_err();
        assert!(matches!(err, RunDispatchError::UnknownExtension(_)));
    }
}
