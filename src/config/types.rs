use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Root configuration container.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub sessions: SessionsConfig,
    #[serde(default)]
    pub toolchain: ToolchainConfig,
}

/// HTTP listener settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address for the HTTP server (host:port).
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    /// How long shutdown waits for in-flight requests.
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_seconds: u64,
}

/// Session engine limits and timings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionsConfig {
    /// Maximum number of sessions running at once (default: 1024).
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
    /// How long a finished session's output stays readable (default: 30).
    #[serde(default = "default_grace_period")]
    pub grace_period_seconds: u64,
    #[serde(default = "default_reap_interval")]
    pub reap_interval_ms: u64,
    /// Output silence that marks an interactive program as waiting for
    /// input (default: 200).
    #[serde(default = "default_input_grace")]
    pub input_grace_ms: u64,
    /// Drain window for output still in flight after exit (default: 100).
    #[serde(default = "default_exit_linger")]
    pub exit_linger_ms: u64,
    #[serde(default = "default_read_chunk")]
    pub read_chunk_bytes: usize,
    /// Debugger prompt that paces queued commands.
    #[serde(default = "default_prompt_marker")]
    pub prompt_marker: String,
}

/// Compiler and debugger executables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolchainConfig {
    #[serde(default = "default_gcc")]
    pub gcc: String,
    #[serde(default = "default_gxx")]
    pub gxx: String,
    #[serde(default = "default_clang")]
    pub clang: String,
    #[serde(default = "default_clangxx")]
    pub clangxx: String,
    #[serde(default = "default_gdb")]
    pub gdb: String,
    /// Arguments placed before `--args <binary>` on the debugger command line.
    #[serde(default = "default_gdb_args")]
    pub gdb_args: Vec<String>,
    /// Parent directory for per-session build directories (default: system temp dir).
    #[serde(default)]
    pub work_dir: Option<PathBuf>,
    #[serde(default = "default_build_timeout")]
    pub build_timeout_seconds: u64,
}

fn default_bind_addr() -> String {
    "0.0.0.0:10010".to_string()
}

fn default_shutdown_timeout() -> u64 {
    10
}

fn default_max_sessions() -> usize {
    1024
}

fn default_grace_period() -> u64 {
    30
}

fn default_reap_interval() -> u64 {
    1000
}

fn default_input_grace() -> u64 {
    200
}

fn default_exit_linger() -> u64 {
    100
}

fn default_read_chunk() -> usize {
    8192
}

fn default_prompt_marker() -> String {
    "(gdb) ".to_string()
}

fn default_gcc() -> String {
    "gcc".to_string()
}

fn default_gxx() -> String {
    "g++".to_string()
}

fn default_clang() -> String {
    "clang".to_string()
}

fn default_clangxx() -> String {
    "clang++".to_string()
}

fn default_gdb() -> String {
    "gdb".to_string()
}

fn default_gdb_args() -> Vec<String> {
    vec!["-q".to_string(), "-ex".to_string(), "set pagination off".to_string()]
}

fn default_build_timeout() -> u64 {
    30
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            shutdown_timeout_seconds: default_shutdown_timeout(),
        }
    }
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            max_sessions: default_max_sessions(),
            grace_period_seconds: default_grace_period(),
            reap_interval_ms: default_reap_interval(),
            input_grace_ms: default_input_grace(),
            exit_linger_ms: default_exit_linger(),
            read_chunk_bytes: default_read_chunk(),
            prompt_marker: default_prompt_marker(),
        }
    }
}

impl Default for ToolchainConfig {
    fn default() -> Self {
        Self {
            gcc: default_gcc(),
            gxx: default_gxx(),
            clang: default_clang(),
            clangxx: default_clangxx(),
            gdb: default_gdb(),
            gdb_args: default_gdb_args(),
            work_dir: None,
            build_timeout_seconds: default_build_timeout(),
        }
    }
}
