// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

/*
 * Copyright 2025 Neuraville Inc.
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 */

//! # Substitution Engine
//!
//! Model code is written once against symbolic placeholders and reused by
//! every backend and every presynaptic update strategy; only the bindings
//! differ.
//!
//! ## Placeholder syntax
//! ```text
//! $(name)                 variable: replaced by the bound text
//! $(name, arg0, arg1)     function: bound template with $(0), $(1) replaced
//!                         by the call-site argument text (verbatim, not evaluated)
//! ```
//!
//! ## Chaining
//! A context may borrow a parent. Lookup walks from the innermost context
//! outwards and the first context that binds a name wins, so inner bindings
//! shadow outer ones. The borrow makes a child's lifetime strictly nested in
//! its parent's.
//!
//! ```text
//! kernel context      id -> "lid", t -> "t"
//!   └─ synapse context   id_pre -> "preInd", addToInSyn(1) -> "atomicAdd(&dd_inSynX[ipost], $(0))"
//! ```

use ahash::AHashMap;

use feagi_kernelgen_model::{utils::scalar_literal, Precision};

use crate::error::{CodegenError, Result};

/// Bound on substitution passes; exceeded only by self-referential bindings
const MAX_PASSES: usize = 64;

#[derive(Debug, Clone)]
struct FuncSubstitution {
    arity: usize,
    template: String,
}

/// What a name resolves to in the innermost context binding it
enum Binding<'a> {
    Var(&'a str),
    Func(&'a FuncSubstitution),
}

/// A placeholder found in a code fragment
#[derive(Debug)]
struct Placeholder<'c> {
    name: &'c str,
    args: Option<Vec<&'c str>>,
    /// Byte offset one past the closing parenthesis
    end: usize,
}

/// One layer of placeholder bindings, optionally chained to a parent
#[derive(Debug, Default)]
pub struct Substitutions<'p> {
    parent: Option<&'p Substitutions<'p>>,
    vars: AHashMap<String, String>,
    funcs: AHashMap<String, FuncSubstitution>,
    template_arity: Option<usize>,
}

impl<'p> Substitutions<'p> {
    /// Root context with no parent
    pub fn new() -> Self {
        Self {
            parent: None,
            vars: AHashMap::new(),
            funcs: AHashMap::new(),
            template_arity: None,
        }
    }

    /// Context whose unresolved lookups fall through to `parent`
    pub fn with_parent(parent: &'p Substitutions<'p>) -> Self {
        Self {
            parent: Some(parent),
            vars: AHashMap::new(),
            funcs: AHashMap::new(),
            template_arity: None,
        }
    }

    /// Child context borrowing this one
    pub fn child(&self) -> Substitutions<'_> {
        Substitutions::with_parent(self)
    }

    /// Mark text produced in this context (and its children) as a function template taking `arity` arguments
    ///
    /// [`Self::apply_check_unreplaced`] then accepts positional markers below `arity`.
    pub fn set_template_arity(&mut self, arity: usize) {
        self.template_arity = Some(arity);
    }

    /// Template arity of the innermost context that set one, 0 otherwise
    pub fn template_arity(&self) -> usize {
        let mut context = Some(self);
        while let Some(c) = context {
            if let Some(arity) = c.template_arity {
                return arity;
            }
            context = c.parent;
        }
        0
    }

    /// Bind (or rebind) variable `name` in this context
    pub fn add_var_substitution(
        &mut self,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<()> {
        let name = name.into();
        if self.funcs.contains_key(&name) {
            return Err(CodegenError::NameCollision {
                name,
                existing: "function",
            });
        }
        self.vars.insert(name, value.into());
        Ok(())
    }

    /// Bind (or rebind) function `name` taking `arity` arguments, written `$(0)`..`$(arity-1)` in `template`
    pub fn add_func_substitution(
        &mut self,
        name: impl Into<String>,
        arity: usize,
        template: impl Into<String>,
    ) -> Result<()> {
        let name = name.into();
        if self.vars.contains_key(&name) {
            return Err(CodegenError::NameCollision {
                name,
                existing: "variable",
            });
        }
        self.funcs.insert(
            name,
            FuncSubstitution {
                arity,
                template: template.into(),
            },
        );
        Ok(())
    }

    /// Bind every parameter name to its value as a `scalar` literal
    pub fn add_param_value_substitution<'n, I>(&mut self, params: I, precision: Precision) -> Result<()>
    where
        I: IntoIterator<Item = (&'n str, f64)>,
    {
        for (name, value) in params {
            self.add_var_substitution(name, format!("({})", scalar_literal(value, precision)))?;
        }
        Ok(())
    }

    /// Bind `<var><suffix>` to `<prefix><var><source_suffix><index>` for each variable name
    pub fn add_var_name_substitution<'n, I>(
        &mut self,
        var_names: I,
        suffix: &str,
        prefix: &str,
        source_suffix: &str,
    ) -> Result<()>
    where
        I: IntoIterator<Item = &'n str>,
    {
        for var in var_names {
            self.add_var_substitution(
                format!("{}{}", var, suffix),
                format!("{}{}{}", prefix, var, source_suffix),
            )?;
        }
        Ok(())
    }

    fn lookup(&self, name: &str) -> Option<Binding<'_>> {
        let mut context = Some(self);
        while let Some(c) = context {
            if let Some(value) = c.vars.get(name) {
                return Some(Binding::Var(value));
            }
            if let Some(func) = c.funcs.get(name) {
                return Some(Binding::Func(func));
            }
            context = c.parent;
        }
        None
    }

    pub fn has_var(&self, name: &str) -> bool {
        matches!(self.lookup(name), Some(Binding::Var(_)))
    }

    /// Replacement text of variable `name`, searching the whole chain
    pub fn var(&self, name: &str) -> Result<&str> {
        match self.lookup(name) {
            Some(Binding::Var(value)) => Ok(value),
            _ => Err(CodegenError::UnresolvedPlaceholder {
                name: name.to_string(),
                context: "variable lookup".to_string(),
                code: String::new(),
            }),
        }
    }

    /// Substitute every resolvable placeholder until a pass changes nothing
    ///
    /// Unknown placeholders are left in place; see [`Self::apply_check_unreplaced`].
    pub fn apply(&self, code: &str) -> Result<String> {
        let mut current = code.to_string();
        for _ in 0..MAX_PASSES {
            match self.substitute_pass(&current)? {
                Some(next) => current = next,
                None => return Ok(current),
            }
        }
        Err(CodegenError::SubstitutionDepthExceeded {
            passes: MAX_PASSES,
            code: code.to_string(),
        })
    }

    /// [`Self::apply`], then fail on any placeholder left unresolved
    ///
    /// Positional markers are accepted only below [`Self::template_arity`].
    pub fn apply_check_unreplaced(&self, code: &str, context: &str) -> Result<String> {
        let result = self.apply(code)?;
        check_unreplaced(&result, self.template_arity(), context, code)?;
        Ok(result)
    }

    /// [`Self::apply`] for text that will itself become a function template with `arity` arguments
    ///
    /// Positional markers `$(0)`..`$(arity-1)` may remain; anything else must resolve.
    pub fn apply_check_template(&self, code: &str, arity: usize, context: &str) -> Result<String> {
        let result = self.apply(code)?;
        check_unreplaced(&result, arity, context, code)?;
        Ok(result)
    }

    /// One left-to-right pass; `None` when nothing was substituted
    fn substitute_pass(&self, code: &str) -> Result<Option<String>> {
        let mut output = String::with_capacity(code.len());
        let mut changed = false;
        let mut cursor = 0;

        while let Some(offset) = code[cursor..].find("$(") {
            let start = cursor + offset;
            output.push_str(&code[cursor..start]);

            let placeholder = match parse_placeholder(code, start) {
                Ok(Some(p)) => p,
                Ok(None) => {
                    output.push_str("$(");
                    cursor = start + 2;
                    continue;
                }
                Err(()) => {
                    return Err(CodegenError::MalformedPlaceholder {
                        context: "substitution".to_string(),
                        code: code.to_string(),
                    })
                }
            };

            match (self.lookup(placeholder.name), &placeholder.args) {
                (Some(Binding::Var(value)), None) => {
                    output.push_str(value);
                    cursor = placeholder.end;
                    changed = true;
                }
                (Some(Binding::Var(_)), Some(args)) => {
                    return Err(CodegenError::ArityMismatch {
                        name: placeholder.name.to_string(),
                        expected: 0,
                        actual: args.len(),
                    });
                }
                (Some(Binding::Func(func)), args) => {
                    let args = args.as_deref().unwrap_or(&[]);
                    if args.len() != func.arity {
                        return Err(CodegenError::ArityMismatch {
                            name: placeholder.name.to_string(),
                            expected: func.arity,
                            actual: args.len(),
                        });
                    }
                    output.push_str(&expand_template(&func.template, args));
                    cursor = placeholder.end;
                    changed = true;
                }
                (None, _) => {
                    // Leave it; nested placeholders in its arguments may still resolve
                    output.push_str("$(");
                    cursor = start + 2;
                }
            }
        }

        if !changed {
            return Ok(None);
        }
        output.push_str(&code[cursor..]);
        Ok(Some(output))
    }
}

fn is_name_char(c: u8) -> bool {
    c.is_ascii_alphanumeric() || c == b'_'
}

/// Parse the placeholder starting at `start` (which points at `$(`)
///
/// `Ok(None)` when the text is not placeholder syntax (e.g. `$( x)`),
/// `Err(())` when a placeholder is opened but never closed. Trailing
/// whitespace after the name is accepted, so `$(V )` names `V`.
fn parse_placeholder(code: &str, start: usize) -> std::result::Result<Option<Placeholder<'_>>, ()> {
    let bytes = code.as_bytes();
    let name_start = start + 2;
    let mut i = name_start;
    while i < bytes.len() && is_name_char(bytes[i]) {
        i += 1;
    }
    if i == name_start || i >= bytes.len() {
        return if i >= bytes.len() && i > name_start {
            Err(())
        } else {
            Ok(None)
        };
    }
    let name = &code[name_start..i];

    // Whitespace between the name and its terminator belongs to the placeholder
    while i < bytes.len() && bytes[i].is_ascii_whitespace() {
        i += 1;
    }
    if i >= bytes.len() {
        return Err(());
    }

    match bytes[i] {
        b')' => Ok(Some(Placeholder {
            name,
            args: None,
            end: i + 1,
        })),
        b',' => {
            let mut args = Vec::new();
            let mut depth = 0usize;
            let mut arg_start = i + 1;
            let mut j = i + 1;
            while j < bytes.len() {
                match bytes[j] {
                    b'(' => depth += 1,
                    b')' if depth > 0 => depth -= 1,
                    b')' => {
                        args.push(code[arg_start..j].trim());
                        return Ok(Some(Placeholder {
                            name,
                            args: Some(args),
                            end: j + 1,
                        }));
                    }
                    b',' if depth == 0 => {
                        args.push(code[arg_start..j].trim());
                        arg_start = j + 1;
                    }
                    _ => {}
                }
                j += 1;
            }
            Err(())
        }
        _ => Ok(None),
    }
}

/// Replace positional markers `$(k)` in `template` with `args[k]` in a single scan
///
/// Argument text is inserted verbatim and never rescanned here, so an argument
/// that itself contains `$(1)` is not touched by this expansion.
fn expand_template(template: &str, args: &[&str]) -> String {
    let bytes = template.as_bytes();
    let mut output = String::with_capacity(template.len());
    let mut cursor = 0;

    while let Some(offset) = template[cursor..].find("$(") {
        let start = cursor + offset;
        output.push_str(&template[cursor..start]);

        let digits_start = start + 2;
        let mut i = digits_start;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }

        let index = if i > digits_start && i < bytes.len() && bytes[i] == b')' {
            template[digits_start..i].parse::<usize>().ok()
        } else {
            None
        };

        match index.and_then(|k| args.get(k)) {
            Some(arg) => {
                output.push_str(arg);
                cursor = i + 1;
            }
            None => {
                output.push_str("$(");
                cursor = digits_start;
            }
        }
    }

    output.push_str(&template[cursor..]);
    output
}

/// Fail on the first placeholder in `code` other than positional markers below `allowed_positional`
fn check_unreplaced(code: &str, allowed_positional: usize, context: &str, original: &str) -> Result<()> {
    let mut cursor = 0;
    while let Some(offset) = code[cursor..].find("$(") {
        let start = cursor + offset;
        match parse_placeholder(code, start) {
            Ok(Some(p)) => {
                let positional = p.name.bytes().all(|b| b.is_ascii_digit())
                    && p.args.is_none()
                    && p.name.parse::<usize>().map(|k| k < allowed_positional).unwrap_or(false);
                if !positional {
                    return Err(CodegenError::UnresolvedPlaceholder {
                        name: p.name.to_string(),
                        context: context.to_string(),
                        code: original.to_string(),
                    });
                }
            }
            Ok(None) => {}
            Err(()) => {
                return Err(CodegenError::MalformedPlaceholder {
                    context: context.to_string(),
                    code: original.to_string(),
                })
            }
        }
        cursor = start + 2;
    }
    Ok(())
}
