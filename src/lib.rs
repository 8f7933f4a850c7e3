//! A Warren Abstract Machine core.
//!
//! [`compile`] translates first-order Horn clauses into a byte-code
//! instruction set ([`bc`]); [`machine`] executes that byte code with
//! unification, environment frames, choice points and a trail, yielding
//! answers as a lazy iterator of binding sets.
//!
//! ```
//! use horn_vm::compile::{compile_program, compile_query};
//! use horn_vm::machine::Machine;
//! use horn_vm::symbol::SymbolTable;
//! use horn_vm::syntax::{lower_program, parse::parse_program};
//!
//! let mut syms = SymbolTable::new();
//! let asts = parse_program("edge(a, b). edge(b, c).").unwrap();
//! let clauses = lower_program(&asts, &mut syms).unwrap();
//!
//! let mut machine = Machine::new();
//! for pred in compile_program(&clauses).unwrap() {
//!     machine.load(&pred).unwrap();
//! }
//!
//! let query = parse_program("?- edge(a, X).").unwrap();
//! let query = lower_program(&query, &mut syms).unwrap();
//! let query = compile_query(&query[0]).unwrap();
//!
//! let answers: Vec<_> = machine
//!     .resolve_query(&query)
//!     .unwrap()
//!     .map(|bindings| {
//!         let bindings = bindings.unwrap();
//!         syms.display(&bindings["X"]).to_string()
//!     })
//!     .collect();
//! assert_eq!(answers, ["b"]);
//! ```

pub mod bc;
pub mod cell;
pub mod compile;
pub mod defs;
pub mod machine;
pub mod symbol;
pub mod syntax;
