use crate::runner::ProcessRunner;

pub const PROGRAM_ENV: &str = "BUILDAH_BIN";
pub const DEBUG_ENV: &str = "BUILDAHSCRIPT_DEBUG";
const DEFAULT_PROGRAM: &str = "buildah";

/// How the external build tool is located and how loudly it is driven.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolConfig {
    pub program: String,
    pub debug: bool,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            program: DEFAULT_PROGRAM.to_string(),
            debug: false,
        }
    }
}

impl ToolConfig {
    /// Override the program, ignoring blank values.
    pub fn with_program(mut self, program: Option<&str>) -> Self {
        if let Some(program) = program.map(str::trim).filter(|p| !p.is_empty()) {
            self.program = program.to_string();
        }
        self
    }

    pub fn runner(&self) -> ProcessRunner {
        ProcessRunner::new(&self.program).with_debug(self.debug)
    }
}

pub fn load_from_env() -> ToolConfig {
    let program = match std::env::var(PROGRAM_ENV) {
        Ok(val) if !val.trim().is_empty() => val.trim().to_string(),
        _ => DEFAULT_PROGRAM.to_string(),
    };
    let debug = matches!(std::env::var(DEBUG_ENV), Ok(val) if !val.is_empty() && val != "0");
    ToolConfig { program, debug }
}
