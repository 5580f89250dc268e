//! Building submitted sources and deciding what a session runs.
//!
//! Every build gets its own scratch directory. The directory travels with
//! the [`SpawnSpec`] into the session, so the binary stays on disk exactly
//! as long as the session that runs it.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::str::FromStr;
use std::time::Duration;

use tempfile::TempDir;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info};

use crate::config::ToolchainConfig;
use crate::session::{SessionMode, SpawnSpec};

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("unsupported language '{0}'")]
    UnsupportedLanguage(String),

    #[error("unsupported compiler '{0}'")]
    UnsupportedCompiler(String),

    #[error("failed to run compiler '{compiler}': {source}")]
    CompilerUnavailable {
        compiler: String,
        #[source]
        source: std::io::Error,
    },

    #[error("build directory error: {0}")]
    Io(#[from] std::io::Error),

    #[error("compilation timed out after {seconds}s")]
    TimedOut { seconds: u64 },

    #[error("compilation failed:\n{diagnostics}")]
    CompileFailed { diagnostics: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Language {
    C,
    Cpp,
}

impl Language {
    fn source_name(self) -> &'static str {
        match self {
            Language::C => "main.c",
            Language::Cpp => "main.cpp",
        }
    }
}

impl FromStr for Language {
    type Err = BuildError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "c" => Ok(Language::C),
            "cpp" | "c++" | "cxx" => Ok(Language::Cpp),
            _ => Err(BuildError::UnsupportedLanguage(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compiler {
    Gcc,
    Clang,
}

impl FromStr for Compiler {
    type Err = BuildError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gcc" => Ok(Compiler::Gcc),
            "clang" => Ok(Compiler::Clang),
            _ => Err(BuildError::UnsupportedCompiler(s.to_string())),
        }
    }
}

/// One submitted program.
#[derive(Debug, Clone)]
pub struct BuildRequest {
    pub language: Language,
    pub compiler: Compiler,
    pub source: String,
    /// Extra compiler flags, whitespace separated.
    pub compiler_options: String,
}

/// A compiled program and the scratch directory holding it.
#[derive(Debug)]
pub struct Build {
    dir: TempDir,
    binary: PathBuf,
}

impl Build {
    pub fn binary(&self) -> &Path {
        &self.binary
    }

    pub fn dir(&self) -> &Path {
        self.dir.path()
    }
}

pub struct Toolchain {
    config: ToolchainConfig,
}

impl Toolchain {
    pub fn new(config: ToolchainConfig) -> Self {
        Self { config }
    }

    /// Executable used for `language` with `compiler`.
    pub fn compiler_path(&self, language: Language, compiler: Compiler) -> &str {
        match (language, compiler) {
            (Language::C, Compiler::Gcc) => &self.config.gcc,
            (Language::Cpp, Compiler::Gcc) => &self.config.gxx,
            (Language::C, Compiler::Clang) => &self.config.clang,
            (Language::Cpp, Compiler::Clang) => &self.config.clangxx,
        }
    }

    /// `<src> -o <bin> [-g] <options...>`
    pub fn compile_args(source: &Path, binary: &Path, with_symbols: bool, options: &str) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![source.into(), "-o".into(), binary.into()];
        if with_symbols {
            args.push("-g".into());
        }
        args.extend(split_args(options).into_iter().map(OsString::from));
        args
    }

    /// Compile `request` into a fresh scratch directory. `with_symbols`
    /// adds debugging symbols.
    pub async fn build(&self, request: &BuildRequest, with_symbols: bool) -> Result<Build, BuildError> {
        let dir = self.scratch_dir().await?;
        let source = dir.path().join(request.language.source_name());
        tokio::fs::write(&source, &request.source).await?;
        let binary = dir.path().join("main.out");

        let compiler = self.compiler_path(request.language, request.compiler);
        let mut command = Command::new(compiler);
        command
            .args(Self::compile_args(&source, &binary, with_symbols, &request.compiler_options))
            .current_dir(dir.path())
            .stdin(Stdio::null())
            .kill_on_drop(true);

        let seconds = self.config.build_timeout_seconds;
        let output = match tokio::time::timeout(Duration::from_secs(seconds), command.output()).await {
            Ok(output) => output.map_err(|source| BuildError::CompilerUnavailable {
                compiler: compiler.to_string(),
                source,
            })?,
            Err(_) => {
                info!(compiler, seconds, "compilation timed out");
                return Err(BuildError::TimedOut { seconds });
            }
        };

        if !output.status.success() {
            let mut diagnostics = String::from_utf8_lossy(&output.stderr).into_owned();
            diagnostics.push_str(&String::from_utf8_lossy(&output.stdout));
            info!(compiler, status = %output.status, "compilation failed");
            return Err(BuildError::CompileFailed { diagnostics });
        }

        debug!(compiler, binary = %binary.display(), debug_info = with_symbols, "build finished");
        Ok(Build { dir, binary })
    }

    /// What a session in `mode` runs for `build`. `args` are the
    /// program's command-line arguments, whitespace separated.
    pub fn spawn_spec(&self, build: Build, mode: SessionMode, args: &str) -> SpawnSpec {
        let args = split_args(args);
        let spec = match mode {
            SessionMode::Debugger => SpawnSpec::new(&self.config.gdb)
                .args(&self.config.gdb_args)
                .arg("--args")
                .arg(&build.binary)
                .args(args),
            SessionMode::Text | SessionMode::Interactive => SpawnSpec::new(&build.binary).args(args),
        };
        spec.cwd(build.dir.path()).workspace(build.dir)
    }

    async fn scratch_dir(&self) -> std::io::Result<TempDir> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("runbox-");
        match &self.config.work_dir {
            Some(parent) => {
                tokio::fs::create_dir_all(parent).await?;
                builder.tempdir_in(parent)
            }
            None => builder.tempdir(),
        }
    }
}

/// Split a user-supplied argument string on whitespace.
pub fn split_args(raw: &str) -> Vec<String> {
    raw.split_whitespace().map(str::to_string).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toolchain() -> Toolchain {
        Toolchain::new(ToolchainConfig::default())
    }

    fn fake_build() -> Build {
        let dir = TempDir::new().unwrap();
        let binary = dir.path().join("main.out");
        Build { dir, binary }
    }

    fn has_tool(name: &str) -> bool {
        std::process::Command::new(name)
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .is_ok()
    }

    #[test]
    fn parses_language_and_compiler() {
        assert_eq!("c".parse::<Language>().unwrap(), Language::C);
        assert_eq!("CPP".parse::<Language>().unwrap(), Language::Cpp);
        assert_eq!("clang".parse::<Compiler>().unwrap(), Compiler::Clang);
        assert!(matches!(
            "rust".parse::<Language>(),
            Err(BuildError::UnsupportedLanguage(lang)) if lang == "rust"
        ));
        assert!(matches!(
            "msvc".parse::<Compiler>(),
            Err(BuildError::UnsupportedCompiler(_))
        ));
    }

    #[test]
    fn compiler_follows_language() {
        let toolchain = toolchain();
        assert_eq!(toolchain.compiler_path(Language::C, Compiler::Gcc), "gcc");
        assert_eq!(toolchain.compiler_path(Language::Cpp, Compiler::Gcc), "g++");
        assert_eq!(toolchain.compiler_path(Language::Cpp, Compiler::Clang), "clang++");
    }

    #[test]
    fn compile_args_put_debug_flag_before_user_options() {
        let args = Toolchain::compile_args(
            Path::new("main.c"),
            Path::new("main.out"),
            true,
            "  -O2   -Wall ",
        );
        assert_eq!(args, ["main.c", "-o", "main.out", "-g", "-O2", "-Wall"]);

        let args = Toolchain::compile_args(Path::new("main.c"), Path::new("main.out"), false, "");
        assert_eq!(args, ["main.c", "-o", "main.out"]);
    }

    #[test]
    fn program_runs_binary_with_arguments() {
        let build = fake_build();
        let binary = build.binary().to_path_buf();
        let dir = build.dir().to_path_buf();

        let spec = toolchain().spawn_spec(build, SessionMode::Interactive, "one  two");
        assert_eq!(spec.program, binary.as_os_str());
        assert_eq!(spec.args, ["one", "two"]);
        assert_eq!(spec.cwd.as_deref(), Some(dir.as_path()));
        assert!(spec.workspace.is_some());
    }

    #[test]
    fn debugger_wraps_binary_in_gdb() {
        let build = fake_build();
        let binary = build.binary().as_os_str().to_os_string();

        let spec = toolchain().spawn_spec(build, SessionMode::Debugger, "input.txt");
        assert_eq!(spec.program, "gdb");
        let expected: Vec<OsString> = vec![
            "-q".into(),
            "-ex".into(),
            "set pagination off".into(),
            "--args".into(),
            binary,
            "input.txt".into(),
        ];
        assert_eq!(spec.args, expected);
    }

    #[tokio::test]
    async fn compile_errors_carry_diagnostics() {
        if !has_tool("gcc") {
            eprintln!("gcc not installed, skipping");
            return;
        }
        let request = BuildRequest {
            language: Language::C,
            compiler: Compiler::Gcc,
            source: "int main(void) { return undefined_symbol; }\n".to_string(),
            compiler_options: String::new(),
        };
        match toolchain().build(&request, false).await {
            Err(BuildError::CompileFailed { diagnostics }) => {
                assert!(diagnostics.contains("undefined_symbol"), "{diagnostics}");
            }
            other => panic!("expected compile failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn successful_build_produces_binary() {
        if !has_tool("gcc") {
            eprintln!("gcc not installed, skipping");
            return;
        }
        let request = BuildRequest {
            language: Language::C,
            compiler: Compiler::Gcc,
            source: "int main(void) { return 0; }\n".to_string(),
            compiler_options: "-O0".to_string(),
        };
        let build = toolchain().build(&request, true).await.unwrap();
        assert!(build.binary().exists());
        assert!(build.dir().join("main.c").exists());
    }
}
