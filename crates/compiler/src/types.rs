//! The Spyre type system: primitives, pointers, and user structs.

use std::fmt;

/// Modifier flags attached to a declaration (`static`, `const`, `volatile`,
/// `cfunc`), packed as bits so `Type` equality can compare them cheaply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Modifiers(u8);

impl Modifiers {
    pub const STATIC: Modifiers = Modifiers(0b0001);
    pub const CONST: Modifiers = Modifiers(0b0010);
    pub const VOLATILE: Modifiers = Modifiers(0b0100);
    pub const CFUNC: Modifiers = Modifiers(0b1000);

    pub fn empty() -> Self {
        Modifiers(0)
    }

    pub fn insert(&mut self, other: Modifiers) {
        self.0 |= other.0;
    }

    pub fn contains(&self, other: Modifiers) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for Modifiers {
    type Output = Modifiers;
    fn bitor(self, rhs: Modifiers) -> Modifiers {
        Modifiers(self.0 | rhs.0)
    }
}

/// A named field inside a `struct` body, in declaration order.
#[derive(Debug, Clone, PartialEq)]
pub struct StructField {
    pub name: String,
    pub ty: Type,
    /// Byte offset from the start of the struct, used by `.` member codegen.
    pub offset: u32,
}

/// `(name, pointer_depth, size_bytes, modifier_flags, is_generic, struct_body?)`
/// as described by the data model: two types compare equal iff name,
/// modifiers, and pointer depth all match.
#[derive(Debug, Clone, PartialEq)]
pub struct Type {
    pub name: String,
    pub pointer_depth: u32,
    pub size_bytes: u32,
    pub modifiers: Modifiers,
    pub is_generic: bool,
    pub struct_fields: Option<Vec<StructField>>,
}

impl Type {
    pub fn builtin(name: &str, size_bytes: u32) -> Self {
        Type {
            name: name.to_string(),
            pointer_depth: 0,
            size_bytes,
            modifiers: Modifiers::empty(),
            is_generic: false,
            struct_fields: None,
        }
    }

    pub fn int() -> Self {
        Type::builtin("int", 8)
    }

    pub fn float() -> Self {
        Type::builtin("float", 8)
    }

    pub fn byte() -> Self {
        Type::builtin("byte", 1)
    }

    pub fn void() -> Self {
        Type::builtin("void", 0)
    }

    pub fn generic(name: &str) -> Self {
        Type {
            name: name.to_string(),
            pointer_depth: 0,
            size_bytes: 8,
            modifiers: Modifiers::empty(),
            is_generic: true,
            struct_fields: None,
        }
    }

    pub fn pointer_to(mut self) -> Self {
        self.pointer_depth += 1;
        self
    }

    pub fn dereferenced(&self) -> Option<Type> {
        if self.pointer_depth == 0 {
            return None;
        }
        let mut t = self.clone();
        t.pointer_depth -= 1;
        Some(t)
    }

    pub fn is_pointer(&self) -> bool {
        self.pointer_depth > 0
    }

    pub fn is_float(&self) -> bool {
        self.pointer_depth == 0 && self.name == "float"
    }

    /// Every value is moved through the VM's 8-byte-slotted stack regardless
    /// of its declared width.
    pub fn slot_width(&self) -> u32 {
        8
    }

    /// The width of one step of pointer arithmetic through this pointer, i.e.
    /// the size of the pointee.
    pub fn pointee_width(&self) -> u32 {
        if self.pointer_depth > 1 {
            return 8;
        }
        self.size_bytes.max(1)
    }

    /// The prefix (`i` or `f`) codegen uses for an instruction operating on
    /// values of this type.
    pub fn instruction_prefix(&self) -> &'static str {
        if self.is_float() {
            "f"
        } else {
            "i"
        }
    }

    pub fn field(&self, name: &str) -> Option<&StructField> {
        self.struct_fields.as_ref()?.iter().find(|f| f.name == name)
    }

    /// True if a value of `other` may flow into a slot of `self` without a
    /// cast: identical types, or `byte`/`int` interop. Both ride the VM's
    /// same 8-byte stack slot and the same `CDER`/`ISAVE` opcodes, so a
    /// `byte^` load/store and an `int` on the other end of it agree at
    /// runtime even though the declared widths differ.
    pub fn compatible_with(&self, other: &Type) -> bool {
        if self == other {
            return true;
        }
        self.pointer_depth == 0
            && other.pointer_depth == 0
            && matches!((self.name.as_str(), other.name.as_str()), ("byte", "int") | ("int", "byte"))
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        for _ in 0..self.pointer_depth {
            write!(f, "^")?;
        }
        Ok(())
    }
}

/// A function's externally-visible type: parameter types, generics, return.
#[derive(Debug, Clone)]
pub struct FunctionSignature {
    pub name: String,
    pub generics: Vec<String>,
    pub params: Vec<(String, Type)>,
    pub return_type: Type,
    pub is_cfunc: bool,
    pub is_variadic: bool,
    pub implemented: bool,
}

impl FunctionSignature {
    /// True if `other` is an identical re-declaration (forward declaration
    /// followed by a matching implementation).
    pub fn matches(&self, other: &FunctionSignature) -> bool {
        self.generics == other.generics
            && self.params.len() == other.params.len()
            && self.params.iter().zip(&other.params).all(|(a, b)| a.1 == b.1)
            && self.return_type == other.return_type
    }
}
