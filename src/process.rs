//! Synthetic process model: program, interpreter state, and generator.
//!
//! A process is a small program over seven instructions (variable
//! declaration, clamped 16-bit arithmetic, printing, tick-based sleep,
//! and bounded FOR/END loops) plus everything that must survive
//! preemption: program counter, variable map, loop stack, sleep state,
//! and the log of rendered PRINT output. The interpreter runs one
//! instruction per call on whichever core currently holds the process.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Local};
use rand::rngs::SmallRng;
use rand::Rng;

use crate::clock::TickClock;
use crate::types::{CoreId, Pid, Tick};

/// Maximum FOR nesting depth observed during execution.
pub const MAX_LOOP_DEPTH: usize = 3;

/// Shared handle to a process. The mutex is held per instruction, so
/// observers (screen listings, reports) can read state mid-burst.
pub type ProcessRef = Arc<Mutex<Process>>;

/// One program instruction. Operand tokens for declarations, arithmetic
/// and printing are resolved at execution time: a token that parses as
/// an integer is a literal, anything else is a variable name (undefined
/// variables read as 0).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Instruction {
    /// Bind `var`, either to the resolved `value` token or to 0.
    Declare { var: String, value: Option<String> },
    /// `dst = clamp(a + b)`.
    Add { dst: String, a: String, b: String },
    /// `dst = clamp(a - b)`.
    Subtract { dst: String, a: String, b: String },
    /// Append the concatenated rendering of the tokens to the process
    /// log; an empty token list prints the default greeting.
    Print(Vec<String>),
    /// Sleep for the given number of ticks.
    Sleep(u64),
    /// Run the instructions up to the matching `End` this many times.
    For(u16),
    End,
}

/// An active FOR loop: where its body starts and how many passes remain.
#[derive(Debug, Clone, Copy)]
struct LoopFrame {
    body_start: usize,
    remaining: u16,
}

/// A synthetic process.
#[derive(Debug)]
pub struct Process {
    pub pid: Pid,
    pub name: String,
    pub program: Vec<Instruction>,
    /// Program counter (index into `program`).
    pub pc: usize,
    vars: HashMap<String, u16>,
    loop_stack: Vec<LoopFrame>,
    sleeping: bool,
    wake_at: Tick,
    finished: bool,
    /// Rendered PRINT output, in execution order.
    pub logs: Vec<String>,
    /// Last core that ran an instruction of this process.
    pub last_core: Option<CoreId>,
    pub created_at: DateTime<Local>,
    pub finish_time: Option<DateTime<Local>>,
}

impl Process {
    /// Create a process with an empty program.
    pub fn new(pid: Pid, name: impl Into<String>) -> Self {
        Process {
            pid,
            name: name.into(),
            program: Vec::new(),
            pc: 0,
            vars: HashMap::new(),
            loop_stack: Vec::new(),
            sleeping: false,
            wake_at: 0,
            finished: false,
            logs: Vec::new(),
            last_core: None,
            created_at: Local::now(),
            finish_time: None,
        }
    }

    /// Create a process with a fixed program.
    pub fn with_program(pid: Pid, name: impl Into<String>, program: Vec<Instruction>) -> Self {
        let mut p = Self::new(pid, name);
        p.program = program;
        p
    }

    pub fn is_sleeping(&self) -> bool {
        self.sleeping
    }

    /// Tick at which a sleeping process becomes runnable again.
    pub fn wake_at(&self) -> Tick {
        self.wake_at
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Wake the process; called by the dispatcher once the target tick
    /// has arrived.
    pub fn clear_sleep(&mut self) {
        self.sleeping = false;
    }

    /// Value of a variable, if declared.
    pub fn var(&self, name: &str) -> Option<u16> {
        self.vars.get(name).copied()
    }

    /// `(executed, total)` instruction progress. Loop iterations make
    /// `executed` a position, not a count; it is what screen listings
    /// show.
    pub fn progress(&self) -> (usize, usize) {
        (self.pc.min(self.program.len()), self.program.len())
    }

    /// Replace the program with a random well-formed one of
    /// `min_ins..=max_ins` instructions and reset all interpreter state.
    pub fn generate(&mut self, rng: &mut SmallRng, min_ins: u64, max_ins: u64) {
        self.program = generate_program(rng, min_ins, max_ins);
        self.pc = 0;
        self.vars.clear();
        self.loop_stack.clear();
        self.sleeping = false;
        self.wake_at = 0;
        self.finished = false;
        self.logs.clear();
    }

    /// Execute the instruction at `pc`, if any.
    ///
    /// Returns true when an instruction was consumed. Returns false when
    /// the process is finished, still sleeping, or became finished by
    /// running off the end of the program. A SLEEP counts as consumed:
    /// it records the wake tick and advances past itself, so the wake
    /// re-entry starts at the next instruction.
    pub fn run_one_instruction(&mut self, core: CoreId, clock: &TickClock) -> bool {
        if self.finished {
            return false;
        }
        if self.sleeping {
            if clock.now() >= self.wake_at {
                self.sleeping = false;
            } else {
                return false;
            }
        }
        if self.pc >= self.program.len() {
            self.finished = true;
            return false;
        }

        self.last_core = Some(core);
        let ins = self.program[self.pc].clone();
        match ins {
            Instruction::Declare { var, value } => {
                let v = value.map(|t| self.value_of(&t)).unwrap_or(0);
                self.vars.insert(var, v);
                self.pc += 1;
            }
            Instruction::Add { dst, a, b } => {
                let sum = self.value_of(&a) as i64 + self.value_of(&b) as i64;
                self.vars.insert(dst, clamp(sum));
                self.pc += 1;
            }
            Instruction::Subtract { dst, a, b } => {
                let diff = self.value_of(&a) as i64 - self.value_of(&b) as i64;
                self.vars.insert(dst, clamp(diff));
                self.pc += 1;
            }
            Instruction::Print(tokens) => {
                let line = if tokens.is_empty() {
                    format!("Hello world from {}!", self.name)
                } else {
                    tokens
                        .iter()
                        .map(|t| match self.vars.get(t) {
                            Some(v) => v.to_string(),
                            None => t.clone(),
                        })
                        .collect()
                };
                self.logs.push(line);
                self.pc += 1;
            }
            Instruction::Sleep(ticks) => {
                self.sleeping = true;
                self.wake_at = clock.now() + ticks;
                self.pc += 1;
            }
            Instruction::For(repeats) => {
                if self.loop_stack.len() >= MAX_LOOP_DEPTH {
                    self.logs
                        .push(format!("error: FOR nested deeper than {MAX_LOOP_DEPTH}; loop skipped"));
                    self.pc = self.skip_past_matching_end(self.pc);
                } else if repeats == 0 {
                    self.pc = self.skip_past_matching_end(self.pc);
                } else {
                    self.loop_stack.push(LoopFrame {
                        body_start: self.pc + 1,
                        remaining: repeats,
                    });
                    self.pc += 1;
                }
            }
            Instruction::End => match self.loop_stack.last_mut() {
                Some(frame) => {
                    frame.remaining = frame.remaining.saturating_sub(1);
                    if frame.remaining > 0 {
                        self.pc = frame.body_start;
                    } else {
                        self.loop_stack.pop();
                        self.pc += 1;
                    }
                }
                None => {
                    self.logs.push("error: END without matching FOR".to_string());
                    self.pc += 1;
                }
            },
        }

        if self.pc >= self.program.len() {
            self.finished = true;
        }
        true
    }

    /// Resolve an operand token: integer literals parse directly
    /// (clamped to the 16-bit range, 0 on malformed or overflowing
    /// input), anything else is a variable lookup defaulting to 0.
    fn value_of(&self, token: &str) -> u16 {
        let bytes = token.as_bytes();
        let literal = match bytes.first() {
            Some(c) if c.is_ascii_digit() => true,
            Some(b'-') if bytes.len() > 1 => true,
            _ => false,
        };
        if literal {
            clamp(token.parse::<i64>().unwrap_or(0))
        } else {
            self.vars.get(token).copied().unwrap_or(0)
        }
    }

    /// Index one past the END matching the FOR at `for_pc`, counting
    /// balanced FOR/END pairs. Runs to the end of the program when the
    /// program is unbalanced.
    fn skip_past_matching_end(&self, for_pc: usize) -> usize {
        let mut depth = 1usize;
        let mut idx = for_pc + 1;
        while idx < self.program.len() {
            match self.program[idx] {
                Instruction::For(_) => depth += 1,
                Instruction::End => {
                    depth -= 1;
                    if depth == 0 {
                        return idx + 1;
                    }
                }
                _ => {}
            }
            idx += 1;
        }
        self.program.len()
    }
}

fn clamp(value: i64) -> u16 {
    value.clamp(0, u16::MAX as i64) as u16
}

const VAR_POOL: [&str; 6] = ["x", "y", "z", "a", "b", "c"];

/// Produce a well-formed random program of `min_ins..=max_ins`
/// instructions. Every emitted FOR gets 1–5 simple body instructions
/// and a matching END, so generated programs are always balanced and
/// never nest.
pub fn generate_program(rng: &mut SmallRng, min_ins: u64, max_ins: u64) -> Vec<Instruction> {
    let target = rng.gen_range(min_ins..=max_ins) as usize;
    let mut program = Vec::with_capacity(target);
    while program.len() < target {
        let remaining = target - program.len();
        // A loop block needs room for FOR, one body instruction, and END.
        if remaining >= 3 && rng.gen_range(0..8) == 0 {
            let body_len = (rng.gen_range(1..=5) as usize).min(remaining - 2);
            program.push(Instruction::For(rng.gen_range(1..=5)));
            for _ in 0..body_len {
                program.push(random_simple_instruction(rng));
            }
            program.push(Instruction::End);
        } else {
            program.push(random_simple_instruction(rng));
        }
    }
    program
}

fn random_var(rng: &mut SmallRng) -> String {
    VAR_POOL[rng.gen_range(0..VAR_POOL.len())].to_string()
}

fn random_simple_instruction(rng: &mut SmallRng) -> Instruction {
    match rng.gen_range(0..5) {
        0 => Instruction::Declare {
            var: random_var(rng),
            value: Some(rng.gen_range(0..1000u16).to_string()),
        },
        1 => Instruction::Add {
            dst: random_var(rng),
            a: random_var(rng),
            b: rng.gen_range(0..100u16).to_string(),
        },
        2 => Instruction::Subtract {
            dst: random_var(rng),
            a: random_var(rng),
            b: rng.gen_range(0..100u16).to_string(),
        },
        3 => {
            if rng.gen_bool(0.5) {
                Instruction::Print(Vec::new())
            } else {
                Instruction::Print(vec!["Value: ".to_string(), random_var(rng)])
            }
        }
        _ => Instruction::Sleep(rng.gen_range(0..10)),
    }
}
