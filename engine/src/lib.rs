//! # engine
//!
//! Reads a build script, binds its declared parameters, and runs it against a
//! [`Capabilities`] surface backed by buildah.
//!
//! ```no_run
//! use capsules_buildah::{load_from_env, Buildah};
//! use engine::{BuildScript, Capabilities, Outcome};
//! use std::collections::BTreeMap;
//! use std::rc::Rc;
//!
//! let script = BuildScript::parse(
//!     "#| arg: base = 'alpine'\n\
//!      c = Container(base)\n\
//!      c.environ['APP_ENV'] = 'prod'\n\
//!      return c.commit()\n",
//! )?;
//! let params = script.bind(&BTreeMap::new())?;
//! let caps = Capabilities::new(Buildah::new(Rc::new(load_from_env().runner())));
//! if let Outcome::Produced(image) = script.execute(&params, &caps)? {
//!     println!("{}", image);
//! }
//! # Ok::<(), engine::EngineError>(())
//! ```

pub mod args;
mod buildscript;
pub mod error;
mod interp;
pub mod literal;
pub mod metadata;
pub mod script;

pub use args::{bind, BoundParameters, Caster, CasterRegistry};
pub use buildscript::BuildScript;
pub use error::{BindError, EngineError, ErrorKind, ExecError, ParseError};
pub use interp::{execute, Capabilities, Outcome};
pub use literal::Literal;
pub use metadata::{Metadata, ParameterSpec};
