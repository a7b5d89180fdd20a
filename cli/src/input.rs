use anyhow::Result;
use rustyline::DefaultEditor;
use std::path::{Path, PathBuf};

/// Source of operator input lines.
pub trait LineReader {
    fn read_line(&mut self, prompt: &str) -> Result<String>;
}

/// Line editor on the controlling terminal, with history persisted to disk.
pub struct ConsoleInput {
    editor: DefaultEditor,
    history_file: Option<PathBuf>,
}

impl ConsoleInput {
    pub fn new() -> Result<Self> {
        Ok(Self {
            editor: DefaultEditor::new()?,
            history_file: None,
        })
    }

    pub fn with_history(mut self, history_file: PathBuf) -> Self {
        if history_file.exists()
            && let Err(e) = self.editor.load_history(&history_file)
        {
            tracing::warn!("Could not load history from {}: {}", history_file.display(), e);
        }
        self.history_file = Some(history_file);
        self
    }

    fn remember(&mut self, line: &str) {
        if line.trim().is_empty() {
            return;
        }
        if let Err(e) = self.editor.add_history_entry(line) {
            tracing::debug!("Could not add history entry: {}", e);
            return;
        }
        if let Some(path) = &self.history_file
            && history_dir_ready(path)
            && let Err(e) = self.editor.save_history(path)
        {
            tracing::debug!("Could not save history to {}: {}", path.display(), e);
        }
    }
}

/// Creates the directory holding `path`. Failure is logged; history is a
/// convenience and never ends the session.
fn history_dir_ready(path: &Path) -> bool {
    let Some(parent) = path.parent() else {
        return true;
    };
    match std::fs::create_dir_all(parent) {
        Ok(()) => true,
        Err(e) => {
            tracing::debug!("Could not create {}: {}", parent.display(), e);
            false
        }
    }
}

impl LineReader for ConsoleInput {
    /// Ctrl-C and Ctrl-D surface as errors and end the session.
    fn read_line(&mut self, prompt: &str) -> Result<String> {
        let line = self.editor.readline(prompt)?;
        self.remember(&line);
        Ok(line)
    }
}
