// Each test binary uses a different subset of these helpers.
#![allow(dead_code)]

use flate2::write::GzEncoder;
use flate2::Compression;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::TempDir;

pub struct TestContext {
    pub temp_dir: TempDir,
    pub config_path: PathBuf,
    pub cache_path: PathBuf,
    pub bin_dir: PathBuf,
    pub bin_path: PathBuf,
}

impl TestContext {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let config_path = temp_dir.path().join("config.json");
        let cache_path = temp_dir.path().join("cache").join("cache.json");
        let bin_dir = temp_dir.path().join("bin");
        std::fs::create_dir_all(&bin_dir).expect("Failed to create bin dir");

        let bin_path = PathBuf::from(env!("CARGO_BIN_EXE_relget"));

        Self {
            temp_dir,
            config_path,
            cache_path,
            bin_dir,
            bin_path,
        }
    }

    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    pub fn cmd(&self) -> Command {
        let mut cmd = Command::new(&self.bin_path);
        cmd.env("RELGET_CONFIG", &self.config_path);
        cmd.env("RELGET_CACHE", &self.cache_path);
        cmd.env_remove("RELGET_BIN");
        cmd.env_remove("GITHUB_TOKEN");
        cmd.env_remove("RUST_LOG");
        // Keep the user's real config and cache out of reach
        cmd.env("HOME", self.temp_dir.path());
        cmd.env("XDG_CONFIG_HOME", self.temp_dir.path().join("config"));
        cmd.env("XDG_CACHE_HOME", self.temp_dir.path().join("cache-home"));
        cmd.current_dir(self.temp_dir.path());
        cmd
    }

    pub fn write_config(&self, json: &str) {
        std::fs::write(&self.config_path, json).expect("Failed to write config");
    }

    /// Writes a gzipped tarball of `(path, mode, contents)` entries.
    pub fn write_tar_gz(&self, name: &str, entries: &[(&str, u32, &[u8])]) -> PathBuf {
        let path = self.temp_dir.path().join(name);
        std::fs::write(&path, tar_gz(entries)).expect("Failed to write archive");
        path
    }
}

pub fn tar_gz(entries: &[(&str, u32, &[u8])]) -> Vec<u8> {
    let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
    for (path, mode, data) in entries {
        let mut header = tar::Header::new_gnu();
        header.set_entry_type(tar::EntryType::Regular);
        header.set_size(data.len() as u64);
        header.set_mode(*mode);
        builder
            .append_data(&mut header, path, *data)
            .expect("Failed to append tar entry");
    }
    builder
        .into_inner()
        .and_then(|gz| gz.finish())
        .expect("Failed to finish archive")
}

pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub status: std::process::ExitStatus,
}

impl From<Output> for CommandOutput {
    fn from(output: Output) -> Self {
        Self {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            status: output.status,
        }
    }
}

impl CommandOutput {
    pub fn assert_success(&self) -> &Self {
        if !self.status.success() {
            panic!(
                "Command failed with status {:?}\nstdout: {}\nstderr: {}",
                self.status.code(),
                self.stdout,
                self.stderr
            );
        }
        self
    }

    pub fn assert_failure(&self) -> &Self {
        assert_eq!(
            self.status.code(),
            Some(1),
            "Expected exit code 1\nstdout: {}\nstderr: {}",
            self.stdout,
            self.stderr
        );
        self
    }

    pub fn assert_stdout_contains(&self, text: &str) -> &Self {
        assert!(
            self.stdout.contains(text),
            "Stdout did not contain '{}'\nActual stdout: {}",
            text,
            self.stdout
        );
        self
    }

    pub fn assert_stderr_contains(&self, text: &str) -> &Self {
        assert!(
            self.stderr.contains(text),
            "Stderr did not contain '{}'\nActual stderr: {}",
            text,
            self.stderr
        );
        self
    }
}
