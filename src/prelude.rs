//! Names needed in nearly every module, so each one starts with a single
//! `use crate::prelude::*;` instead of repeating these imports.

pub(crate) use anyhow::{anyhow, bail, Context as _, Result};
pub(crate) use tracing::{trace, debug, info, warn, error};
