//! Per-language rules for turning code + tests into a runnable program

use duet_core::{Language, Result};
use std::path::{Path, PathBuf};

/// How a language's code and tests are combined and executed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Concatenate code then tests into one file and run it with an interpreter
    Script {
        interpreter: &'static str,
        file: &'static str,
    },
    /// `solution.rs` included into a `main.rs` holding the tests, compiled with rustc
    RustModule,
}

/// One command to run inside the working directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl Step {
    fn new(program: impl Into<PathBuf>, args: &[&str]) -> Self {
        Self {
            program: program.into(),
            args: args.iter().map(|a| a.to_string()).collect(),
        }
    }
}

const PYTHON: Strategy = Strategy::Script {
    interpreter: "python3",
    file: "main.py",
};

impl Strategy {
    /// Pick the strategy for a language; unknown languages run as a python script
    pub fn for_language(language: &Language) -> Self {
        match language.as_str() {
            "python" | "python3" | "py" => PYTHON,
            "javascript" | "js" | "node" | "nodejs" => Strategy::Script {
                interpreter: "node",
                file: "main.js",
            },
            "ruby" | "rb" => Strategy::Script {
                interpreter: "ruby",
                file: "main.rb",
            },
            "bash" | "sh" | "shell" => Strategy::Script {
                interpreter: "sh",
                file: "main.sh",
            },
            "rust" | "rs" => Strategy::RustModule,
            other => {
                tracing::debug!("No strategy for '{}', running as a python script", other);
                PYTHON
            }
        }
    }

    /// Write the program files into `dir` and return the commands to run, in order
    pub fn materialize(&self, dir: &Path, code: &str, tests: &str) -> Result<Vec<Step>> {
        match *self {
            Strategy::Script { interpreter, file } => {
                std::fs::write(dir.join(file), format!("{}\n\n{}\n", code, tests))?;
                Ok(vec![Step::new(interpreter, &[file])])
            }
            Strategy::RustModule => {
                std::fs::write(dir.join("solution.rs"), code)?;

                let body = if tests.contains("fn main") {
                    tests.to_string()
                } else {
                    format!("fn main() {{\n{}\n}}", tests)
                };
                std::fs::write(
                    dir.join("main.rs"),
                    format!(
                        "#![allow(dead_code, unused_imports)]\ninclude!(\"solution.rs\");\n\n{}\n",
                        body
                    ),
                )?;

                Ok(vec![
                    Step::new(
                        "rustc",
                        &["--edition", "2021", "-o", "solution_bin", "main.rs"],
                    ),
                    Step::new(dir.join("solution_bin"), &[]),
                ])
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_every_language_maps_to_a_strategy() {
        assert_eq!(Strategy::for_language(&Language::new("Python")), PYTHON);
        assert_eq!(Strategy::for_language(&Language::new("rs")), Strategy::RustModule);
        assert!(matches!(
            Strategy::for_language(&Language::new("js")),
            Strategy::Script { interpreter: "node", .. }
        ));
        // Unknown falls back to the single-script default
        assert_eq!(Strategy::for_language(&Language::new("cobol")), PYTHON);
    }

    #[test]
    fn test_script_concatenates_code_then_tests() {
        let dir = TempDir::new().unwrap();
        let steps = PYTHON
            .materialize(dir.path(), "def f(): return 1", "assert f() == 1")
            .unwrap();

        assert_eq!(steps, vec![Step::new("python3", &["main.py"])]);
        let program = std::fs::read_to_string(dir.path().join("main.py")).unwrap();
        let code_at = program.find("def f()").unwrap();
        let test_at = program.find("assert f()").unwrap();
        assert!(code_at < test_at);
    }

    #[test]
    fn test_rust_wraps_tests_in_main() {
        let dir = TempDir::new().unwrap();
        let steps = Strategy::RustModule
            .materialize(
                dir.path(),
                "fn add(a: i32, b: i32) -> i32 { a + b }",
                "assert_eq!(add(1, 2), 3);",
            )
            .unwrap();

        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0].program, PathBuf::from("rustc"));
        let main = std::fs::read_to_string(dir.path().join("main.rs")).unwrap();
        assert!(main.contains("include!(\"solution.rs\")"));
        assert!(main.contains("fn main() {\nassert_eq!(add(1, 2), 3);\n}"));
    }

    #[test]
    fn test_rust_keeps_existing_main() {
        let dir = TempDir::new().unwrap();
        Strategy::RustModule
            .materialize(dir.path(), "", "fn main() { println!(\"1 passed\"); }")
            .unwrap();
        let main = std::fs::read_to_string(dir.path().join("main.rs")).unwrap();
        assert_eq!(main.matches("fn main").count(), 1);
    }
}
