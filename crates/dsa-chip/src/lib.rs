//! Silicon model for the quantized matrix-multiply accelerator (DSA).
//!
//! This crate has **no dependencies** and **no hardware access**. It is a
//! pure model of what the host sees: register offsets, bit definitions,
//! data-type and quantization-mode codes, and the address windows the
//! accelerator exposes.
//!
//! The driver (`dsa-driver`) programs these registers; its in-process
//! emulator decodes them. Both sides import the same constants from here so
//! they cannot drift apart.
//!
//! # Crate organisation
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`regs`] | Control window register map, CTRL/STATUS/FEATURES/FLAGS bits |
//! | [`dtype`] | Element type codes (`S8`, `S16`, `S32`) and quant modes |
//! | [`window`] | Control window and operand SRAM window geometry |

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod dtype;
pub mod regs;
pub mod window;
