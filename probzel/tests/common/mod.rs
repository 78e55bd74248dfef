//! Scripted sandbox shared by the integration tests
//!
//! Nothing is compiled or executed. "Compiling" copies `source.cpp` to
//! `source`, and a staged program behaves according to the first word of
//! its text:
//!
//! | program     | behaviour                                        |
//! |-------------|--------------------------------------------------|
//! | `sum`       | prints the sum of the numbers on stdin           |
//! | `wrong`     | prints `0`                                       |
//! | `crash`     | exits with code 3                                |
//! | `slow`      | killed after 3 s of CPU time                     |
//! | `gen`       | prints its arguments                             |
//! | `validator` | fails when stdin contains `bad`                  |
//! | `checker`   | compares `output` with `correct`                 |
//!
//! A source containing `COMPILE_ERROR` fails to compile.
//!
//! A gated backend ([`start_gated_judge`]) reports every command it is about
//! to run and then holds it until the test opens the gate once.

#![allow(dead_code)]

use convenient_judge::{Judge, JudgeConfig, JudgeResult, RunMeta, RunRequest, SandboxBackend};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

#[derive(Default)]
pub struct Recorder {
    pub commands: Mutex<Vec<Vec<String>>>,
}

impl Recorder {
    pub fn count(&self) -> usize {
        self.commands.lock().unwrap().len()
    }
}

/// Backend side of a gate: announces a command, then waits for a release
///
/// Once the test drops its release sender every job passes straight through.
struct Gate {
    entered: Mutex<Sender<Vec<String>>>,
    release: Mutex<Receiver<()>>,
}

impl Gate {
    fn pass(&self, command: &[String]) {
        let _ = self.entered.lock().unwrap().send(command.to_vec());
        let _ = self.release.lock().unwrap().recv();
    }
}

pub struct ScriptedBackend {
    root: PathBuf,
    recorder: Arc<Recorder>,
    gate: Option<Gate>,
}

impl SandboxBackend for ScriptedBackend {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn init_slot(&self, slot: u32) -> JudgeResult<PathBuf> {
        self.cleanup_slot(slot)?;
        let dir = self.root.join(slot.to_string()).join("box");
        fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    fn run(&self, _slot: u32, request: &RunRequest<'_>) -> JudgeResult<RunMeta> {
        self.recorder
            .commands
            .lock()
            .unwrap()
            .push(request.command.to_vec());
        if let Some(gate) = &self.gate {
            gate.pass(request.command);
        }

        let dir = request.box_dir;
        let stdout = dir.join(request.stdout);
        let stderr = dir.join(request.stderr);
        fs::write(&stdout, "")?;
        fs::write(&stderr, "")?;

        if request.command.iter().any(|arg| arg == "source.cpp") {
            let source = fs::read_to_string(dir.join("source.cpp"))?;
            if source.contains("COMPILE_ERROR") {
                fs::write(&stderr, "source.cpp:1:1: error: expected ';'")?;
                return RunMeta::parse("status:RE\nexitcode:1\ntime:0.200");
            }
            let _ = fs::copy(dir.join("source.cpp"), dir.join("source"))?;
            return RunMeta::parse("status:OK\ntime:0.300");
        }

        let program = fs::read_to_string(dir.join("prog")).unwrap_or_default();
        let input = match request.stdin {
            Some(name) => fs::read_to_string(dir.join(name))?,
            None => String::new(),
        };
        let args = &request.command[1..];

        let meta = match program.split_whitespace().next() {
            Some("sum") => {
                let sum: i64 = input
                    .split_whitespace()
                    .filter_map(|w| w.parse::<i64>().ok())
                    .sum();
                fs::write(&stdout, format!("{sum}\n"))?;
                "status:OK\ntime:0.100\ntime-wall:0.150\ncg-mem:2048"
            }
            Some("wrong") => {
                fs::write(&stdout, "0\n")?;
                "status:OK\ntime:0.050\ncg-mem:1024"
            }
            Some("crash") => "status:RE\nexitcode:3\ntime:0.050",
            Some("slow") => "status:TO\ntime:3.000\ntime-wall:3.100\nkilled:1",
            Some("gen") => {
                fs::write(&stdout, format!("{}\n", args.join(" ")))?;
                "status:OK\ntime:0.010"
            }
            Some("validator") => {
                if input.contains("bad") {
                    fs::write(&stderr, "FAIL unexpected token")?;
                    "status:RE\nexitcode:1\ntime:0.010"
                } else {
                    "status:OK\ntime:0.010"
                }
            }
            Some("checker") => {
                let output = fs::read_to_string(dir.join("output")).unwrap_or_default();
                let correct = fs::read_to_string(dir.join("correct")).unwrap_or_default();
                if output.trim() == correct.trim() {
                    "status:OK\ntime:0.010"
                } else {
                    fs::write(&stderr, "wrong answer")?;
                    "status:RE\nexitcode:1\ntime:0.010"
                }
            }
            _ => "status:XX\nmessage:unknown program",
        };
        RunMeta::parse(meta)
    }

    fn cleanup_slot(&self, slot: u32) -> JudgeResult<()> {
        let dir = self.root.join(slot.to_string());
        if dir.exists() {
            fs::remove_dir_all(dir)?;
        }
        Ok(())
    }
}

fn judge_over(tmp: &Path, recorder: &Arc<Recorder>, gate: Option<Gate>) -> Judge {
    let backend = Arc::new(ScriptedBackend {
        root: tmp.join("slots"),
        recorder: Arc::clone(recorder),
        gate,
    });
    let config = JudgeConfig {
        work_root: Some(tmp.join("judge")),
        ..JudgeConfig::default()
    };
    Judge::with_backend(config, backend).unwrap()
}

/// Judge over the scripted backend, keeping its state under `tmp`
pub fn start_judge(tmp: &Path) -> (Judge, Arc<Recorder>) {
    let recorder = Arc::new(Recorder::default());
    (judge_over(tmp, &recorder, None), recorder)
}

/// Test end of a gated judge
pub struct GateControl {
    /// Commands that reached the sandbox, in order
    pub entered: Receiver<Vec<String>>,
    /// One message lets one held command run
    pub release: Sender<()>,
}

impl GateControl {
    /// Next command held at the gate
    pub fn next(&self) -> Vec<String> {
        self.entered
            .recv_timeout(std::time::Duration::from_secs(10))
            .expect("no job reached the sandbox")
    }

    pub fn open_once(&self) {
        self.release.send(()).unwrap();
    }
}

/// Judge whose single worker stops in front of every command
pub fn start_gated_judge(tmp: &Path) -> (Judge, GateControl) {
    let (entered_tx, entered) = mpsc::channel();
    let (release, release_rx) = mpsc::channel();
    let gate = Gate {
        entered: Mutex::new(entered_tx),
        release: Mutex::new(release_rx),
    };
    let judge = judge_over(tmp, &Arc::new(Recorder::default()), Some(gate));
    (judge, GateControl { entered, release })
}

/// Poll `condition` until it holds, for at most ten seconds
pub fn eventually(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = std::time::Instant::now() + std::time::Duration::from_secs(10);
    while !condition() {
        assert!(std::time::Instant::now() < deadline, "timed out waiting for {what}");
        std::thread::sleep(std::time::Duration::from_millis(5));
    }
}

pub fn write(path: &Path, text: &str) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, text).unwrap();
}

pub fn read(path: &Path) -> String {
    fs::read_to_string(path).unwrap()
}

/// Problem with one manual and two generated tests
///
/// Solutions: `main.cpp` (model), `wrong.cpp`, `crash.cpp`, `slow.cpp`,
/// `broken.cpp` (does not compile).
pub fn sample_problem() -> TempDir {
    let tmp = TempDir::new().unwrap();
    let home = tmp.path().join("aplusb");
    write(
        &home.join("problem.yml"),
        "name: aplusb\nmodel_solution: main.cpp\ntime_limit: 1\nmemory_limit: 256\n",
    );
    write(&home.join("script"), ":manual 01\ngen 3 4\ngen 10 20\n");
    write(&home.join("tests.manual/01"), "1 2\n");
    write(&home.join("source/gen.cpp"), "gen");
    write(&home.join("source/check.cpp"), "checker");
    write(&home.join("source/validator.cpp"), "validator");
    write(&home.join("solutions/main.cpp"), "sum");
    write(&home.join("solutions/wrong.cpp"), "wrong");
    write(&home.join("solutions/crash.cpp"), "crash");
    write(&home.join("solutions/slow.cpp"), "slow");
    write(&home.join("solutions/broken.cpp"), "COMPILE_ERROR");
    tmp
}

pub fn home(tmp: &TempDir) -> PathBuf {
    tmp.path().join("aplusb")
}
