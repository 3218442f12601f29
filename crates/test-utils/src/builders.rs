#![allow(dead_code)]

use std::path::{Path, PathBuf};

use simplequeue::config::{ConfigFile, RawConfigFile};
use simplequeue::stream::DIRECTIVE_PREFIX;

/// Builder for task files.
#[derive(Debug, Clone, Default)]
pub struct TaskFileBuilder {
    lines: Vec<String>,
}

impl TaskFileBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn task(mut self, command: &str) -> Self {
        self.lines.push(command.to_string());
        self
    }

    pub fn tasks<'a>(mut self, commands: impl IntoIterator<Item = &'a str>) -> Self {
        self.lines.extend(commands.into_iter().map(String::from));
        self
    }

    pub fn drain(self) -> Self {
        self.directive("DRAIN")
    }

    pub fn directive(mut self, op: &str) -> Self {
        self.lines.push(format!("{DIRECTIVE_PREFIX} {op}"));
        self
    }

    pub fn comment(mut self, text: &str) -> Self {
        self.lines.push(format!("# {text}"));
        self
    }

    pub fn blank(mut self) -> Self {
        self.lines.push(String::new());
        self
    }

    pub fn contents(&self) -> String {
        let mut out = self.lines.join("\n");
        out.push('\n');
        out
    }

    /// Write the file as `dir/name` and return its path.
    pub fn write_to(&self, dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, self.contents()).expect("failed to write task file");
        path
    }
}

/// Builder for `ConfigFile` to simplify test setup.
pub struct ConfigFileBuilder {
    config: RawConfigFile,
}

impl ConfigFileBuilder {
    pub fn new() -> Self {
        Self {
            config: RawConfigFile::default(),
        }
    }

    pub fn ignore_errors(mut self, val: bool) -> Self {
        self.config.driver.ignore_errors = val;
        self
    }

    pub fn max_tasks_per_node(mut self, val: usize) -> Self {
        self.config.driver.max_tasks_per_node = val;
        self
    }

    pub fn launch_delay(mut self, val: &str) -> Self {
        self.config.driver.launch_delay = val.to_string();
        self
    }

    pub fn fetch_delay(mut self, val: &str) -> Self {
        self.config.driver.fetch_delay = val.to_string();
        self
    }

    pub fn shutdown_grace(mut self, val: &str) -> Self {
        self.config.driver.shutdown_grace = val.to_string();
        self
    }

    pub fn listen(mut self, val: &str) -> Self {
        self.config.driver.listen = val.to_string();
        self
    }

    pub fn termination_signals(mut self, names: &[&str]) -> Self {
        self.config.driver.termination_signals = names.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn launcher(mut self, argv: &[&str]) -> Self {
        self.config.driver.launcher = Some(argv.iter().map(|s| s.to_string()).collect());
        self
    }

    pub fn shell(mut self, val: &str) -> Self {
        self.config.agent.shell = val.to_string();
        self
    }

    pub fn agent_grace(mut self, val: &str) -> Self {
        self.config.agent.grace = val.to_string();
        self
    }

    pub fn build_raw(self) -> RawConfigFile {
        self.config
    }

    pub fn build(self) -> ConfigFile {
        ConfigFile::try_from(self.config).expect("Failed to build valid config from builder")
    }
}

impl Default for ConfigFileBuilder {
    fn default() -> Self {
        Self::new()
    }
}
