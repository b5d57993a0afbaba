//! Room module: the in-memory file tree and per-room runtime orchestration.

pub mod file_tree;
pub mod manager;

pub use file_tree::{FileNode, FileTree, FileTreeError};
pub use manager::{RoomError, RoomManager, RoomRuntime};

/// Unique identifier for a file or folder node.
pub type NodeId = String;

/// Maps a file extension to a VS Code-style language id, used for syntax
/// highlighting hints sent to the client.
pub fn detect_language(path: &str) -> String {
    let ext = path.rsplit('.').next().unwrap_or("").to_lowercase();

    match ext.as_str() {
        "rs" => "rust",
        "js" | "mjs" | "cjs" => "javascript",
        "jsx" => "javascriptreact",
        "ts" | "mts" | "cts" => "typescript",
        "tsx" => "typescriptreact",
        "py" | "pyw" => "python",
        "rb" => "ruby",
        "go" => "go",
        "java" => "java",
        "c" => "c",
        "cpp" | "cc" | "cxx" | "c++" => "cpp",
        "h" | "hpp" | "hxx" => "cpp",
        "cs" => "csharp",
        "php" => "php",
        "swift" => "swift",
        "kt" | "kts" => "kotlin",
        "scala" => "scala",
        "html" | "htm" => "html",
        "css" => "css",
        "scss" | "sass" => "scss",
        "less" => "less",
        "json" => "json",
        "jsonc" => "jsonc",
        "xml" => "xml",
        "yaml" | "yml" => "yaml",
        "toml" => "toml",
        "md" | "markdown" => "markdown",
        "sql" => "sql",
        "sh" | "bash" | "zsh" => "shellscript",
        "ps1" | "psm1" => "powershell",
        "dockerfile" => "dockerfile",
        "graphql" | "gql" => "graphql",
        "vue" => "vue",
        "svelte" => "svelte",
        "lua" => "lua",
        "r" => "r",
        "dart" => "dart",
        "elm" => "elm",
        "ex" | "exs" => "elixir",
        "erl" | "hrl" => "erlang",
        "hs" | "lhs" => "haskell",
        "clj" | "cljs" | "cljc" => "clojure",
        "fs" | "fsx" | "fsi" => "fsharp",
        "ml" | "mli" => "ocaml",
        "nim" => "nim",
        "zig" => "zig",
        "v" => "v",
        "sol" => "solidity",
        "move" => "move",
        "proto" => "protobuf",
        "tf" | "tfvars" => "terraform",
        "ini" | "conf" | "cfg" => "ini",
        "env" => "dotenv",
        "txt" => "plaintext",
        "log" => "log",
        "csv" => "csv",
        "diff" | "patch" => "diff",
        "makefile" | "mk" => "makefile",
        "cmake" => "cmake",
        "lock" => "plaintext",
        _ => "plaintext",
    }
    .to_string()
}

/// Check if a file is likely binary based on extension. Binary content is a
/// non-goal; this is used only to decide whether lossy text decoding is
/// acceptable when the FS watcher reads a file back off disk.
pub fn is_binary_extension(path: &str) -> bool {
    let ext = path.rsplit('.').next().unwrap_or("").to_lowercase();

    matches!(
        ext.as_str(),
        "png" | "jpg" | "jpeg" | "gif" | "bmp" | "ico" | "webp" | "svg"
            | "mp3" | "mp4" | "wav" | "ogg" | "webm" | "avi" | "mov"
            | "pdf" | "doc" | "docx" | "xls" | "xlsx" | "ppt" | "pptx"
            | "zip" | "tar" | "gz" | "rar" | "7z" | "bz2"
            | "exe" | "dll" | "so" | "dylib" | "bin"
            | "ttf" | "otf" | "woff" | "woff2" | "eot"
            | "sqlite" | "db" | "sqlite3"
            | "pyc" | "pyo" | "class" | "o" | "obj"
            | "wasm"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_language() {
        assert_eq!(detect_language("main.rs"), "rust");
        assert_eq!(detect_language("app.tsx"), "typescriptreact");
        assert_eq!(detect_language("style.css"), "css");
        assert_eq!(detect_language("data.json"), "json");
        assert_eq!(detect_language("unknown.xyz"), "plaintext");
    }

    #[test]
    fn test_is_binary() {
        assert!(is_binary_extension("image.png"));
        assert!(is_binary_extension("archive.zip"));
        assert!(!is_binary_extension("code.rs"));
        assert!(!is_binary_extension("readme.md"));
    }
}
