//! Pretty printers for values of the inspected process.
//!
//! [`Printers`] is the display driver: it picks a registered [`ValuePrinter`]
//! by the declared type name of a value and falls back to a native rendering
//! for everything else.

use crate::prelude::*;
use crate::target::{Scalar, Target, Type, Value};
use itertools::Itertools;
use regex::Regex;

pub mod node;
pub mod vector;

pub use node::{NodePrinter, NodeView, VisitStamp};
pub use vector::{ElementKind, VectorView};

pub trait ValuePrinter {
    fn to_string(&self, printers: &Printers, target: &Target, value: &Value) -> InspectResult<String>;
}

impl<F> ValuePrinter for F
where
    F: Fn(&Printers, &Target, &Value) -> InspectResult<String>,
{
    fn to_string(&self, printers: &Printers, target: &Target, value: &Value) -> InspectResult<String> {
        self(printers, target, value)
    }
}

struct Registration {
    pattern: Regex,
    printer: Box<dyn ValuePrinter>,
}

#[derive(Default)]
pub struct Printers {
    registrations: Vec<Registration>,
}

impl Printers {
    pub fn new() -> Self {
        Self::default()
    }

    /// The printers of the Selva module: hierarchy nodes.
    pub fn selva() -> Self {
        let mut printers = Self::new();
        printers
            .register(crate::target::types::HIERARCHY_NODE_TYPE, NodePrinter)
            .expect("the node type name is a valid pattern");
        printers
    }

    /// Apply `printer` to every value whose type name matches `pattern` in
    /// full. Earlier registrations win.
    pub fn register<P: ValuePrinter + 'static>(&mut self, pattern: &str, printer: P) -> Result<()> {
        let pattern = Regex::new(&format!("^(?:{pattern})$"))
            .with_context(|| format!("Invalid printer pattern '{pattern}'"))?;
        debug!("Registered printer for /{pattern}/");
        self.registrations.push(Registration {
            pattern,
            printer: Box::new(printer),
        });
        Ok(())
    }

    pub fn lookup(&self, ty: &Type) -> Option<&dyn ValuePrinter> {
        let name = match ty {
            Type::Record(name) => name.clone(),
            other => other.to_string(),
        };
        self.registrations
            .iter()
            .find(|registration| registration.pattern.is_match(&name))
            .map(|registration| registration.printer.as_ref())
    }

    /// Render a value the way the inspector shows it to the user.
    pub fn display(&self, target: &Target, value: &Value) -> InspectResult<String> {
        if let Some(printer) = self.lookup(&value.ty) {
            return printer.to_string(self, target, value);
        }
        if let Type::Pointer(pointee) = &value.ty {
            if let Some(printer) = self.lookup(pointee) {
                let pointee = target.dereference(value)?;
                return printer.to_string(self, target, &pointee);
            }
        }
        self.native(target, value)
    }

    /// Like [`Printers::display`], but a failure is rendered in place so that
    /// the enclosing value can still be shown.
    fn display_nested(&self, target: &Target, value: &Value) -> String {
        self.display(target, value)
            .unwrap_or_else(|error| format!("<error while printing value: {error}>"))
    }

    fn native(&self, target: &Target, value: &Value) -> InspectResult<String> {
        match &value.ty {
            Type::Void => Ok("<data variable, no debug info>".to_string()),
            Type::Scalar(scalar) => self.scalar(target, value, *scalar),
            Type::Pointer(_) => Ok(format!("0x{:x}", target.read_raw(value)?)),
            Type::Array(element, _) if **element == Type::Scalar(Scalar::Char) => {
                Ok(quote_c_string(&target.read_bytes(value)?))
            }
            Type::Array(element, len) => {
                target.value_size(&value.ty)?;
                let address = value
                    .address()
                    .ok_or_else(|| InspectError::evaluation(value.ty.to_string(), "array not located in memory"))?;
                let elements = target.read_array(address, element, *len)?;
                let rendered = elements
                    .iter()
                    .map(|element| self.display_nested(target, element))
                    .join(", ");
                Ok(format!("{{{rendered}}}"))
            }
            Type::Record(name) => {
                let layout = target.types().record(name)?;
                let rendered = layout
                    .fields
                    .iter()
                    .map(|field| {
                        let rendered = match target.field(value, &field.name) {
                            Ok(member) => self.display_nested(target, &member),
                            Err(error) => format!("<error while printing value: {error}>"),
                        };
                        format!("{} = {rendered}", field.name)
                    })
                    .join(", ");
                Ok(format!("{{{rendered}}}"))
            }
        }
    }

    pub(crate) fn scalar(&self, target: &Target, value: &Value, scalar: Scalar) -> InspectResult<String> {
        let integer = target.read_integer(value)?;
        Ok(match scalar {
            Scalar::Bool => (integer != 0).to_string(),
            Scalar::Char => format!("{integer} {}", quote_c_char(integer as u8)),
            _ => integer.to_string(),
        })
    }
}

fn escape_c_byte(byte: u8, quote: char) -> String {
    match byte {
        b'\n' => "\\n".to_string(),
        b'\t' => "\\t".to_string(),
        b'\\' => "\\\\".to_string(),
        b if b as char == quote => format!("\\{quote}"),
        b if b.is_ascii_graphic() || b == b' ' => (b as char).to_string(),
        b => format!("\\{b:03o}"),
    }
}

fn quote_c_char(byte: u8) -> String {
    format!("'{}'", escape_c_byte(byte, '\''))
}

/// Render a fixed size `char` buffer up to its first NUL.
fn quote_c_string(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|b| *b == 0).unwrap_or(bytes.len());
    let escaped = bytes[..end]
        .iter()
        .map(|b| escape_c_byte(*b, '"'))
        .collect::<String>();
    format!("\"{escaped}\"")
}
