use std::{env::current_dir, sync::LazyLock};

use assert_cmd::Command;
use camino::Utf8PathBuf;

static TEST_DATA: LazyLock<Utf8PathBuf> = LazyLock::new(|| {
    let dir = current_dir()
        .expect("cannot determine current directory")
        .join("tests")
        .join("integration")
        .join("test-data");

    Utf8PathBuf::try_from(dir).expect("test data path is not UTF-8")
});

pub fn fixture(name: &str) -> String {
    let path = TEST_DATA.join(name);
    assert!(path.exists(), "missing fixture: {path}");
    path.to_string()
}

pub struct Briareus {
    cmd: Command,
    offline: bool,
    input: Option<String>,
}

impl Briareus {
    pub fn new() -> Self {
        Self {
            cmd: Command::cargo_bin("briareus").expect("briareus binary not built"),
            offline: true,
            input: None,
        }
    }

    pub fn args<'a>(mut self, args: impl IntoIterator<Item = &'a str>) -> Self {
        self.cmd.args(args);
        self
    }

    pub fn input(mut self, input: impl Into<String>) -> Self {
        self.input = Some(input.into());
        self
    }

    pub fn offline(mut self, flag: bool) -> Self {
        self.offline = flag;
        self
    }

    pub fn run(mut self) -> Output {
        if self.offline {
            self.cmd.arg("--offline");
        }
        if let Some(input) = &self.input {
            self.cmd.arg(input);
        }

        let output = self.cmd.output().expect("failed to run briareus");
        Output {
            status: output.status.code(),
            stdout: String::from_utf8(output.stdout).expect("stdout is not UTF-8"),
            stderr: String::from_utf8(output.stderr).expect("stderr is not UTF-8"),
        }
    }
}

pub struct Output {
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

pub fn briareus() -> Briareus {
    Briareus::new()
}
