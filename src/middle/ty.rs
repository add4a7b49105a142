use colored::Colorize;

/// The inference lattice. Every HIR expression carries one of these; an
/// inference conflict degrades to [`Ty::Unknown`] so later stages can keep
/// going in best-effort mode.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Ty {
    /// 1L
    Int,
    /// 1.5 (and unsuffixed whole numbers, as in R)
    Double,
    /// TRUE / FALSE
    Logical,
    /// "text"
    Char,
    /// A homogeneous R vector of the element type
    Vector(Box<Ty>),
    /// A record (emitted as a named R list). Field types are not tracked.
    Record,
    /// The type of statements and value-less calls
    Unit,
    Unknown,
}

impl Ty {
    pub fn vector_of(element: Ty) -> Self {
        Ty::Vector(Box::new(element))
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Ty::Int | Ty::Double)
    }

    pub fn is_vector(&self) -> bool {
        matches!(self, Ty::Vector(_))
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, Ty::Unknown)
    }

    /// The element type of a vector; scalars are their own element type
    /// (R scalars are length-one vectors).
    pub fn element(&self) -> Ty {
        match self {
            Ty::Vector(element) => (**element).clone(),
            other => other.clone(),
        }
    }

    /// Maps a surface type annotation (`int`, `f64`, `logical`, ...) onto
    /// the lattice.
    pub fn from_annotation(name: &str) -> Option<Ty> {
        Some(match name {
            "int" | "i32" | "i64" | "integer" => Ty::Int,
            "float" | "f64" | "double" | "num" => Ty::Double,
            "bool" | "logical" => Ty::Logical,
            "str" | "character" | "chr" => Ty::Char,
            _ => return None,
        })
    }

    /// Least upper bound of two types, following R's numeric promotion.
    /// Incompatible types join to [`Ty::Unknown`].
    pub fn join(&self, other: &Ty) -> Ty {
        match (self, other) {
            (a, b) if a == b => a.clone(),
            (Ty::Unknown, _) | (_, Ty::Unknown) => Ty::Unknown,
            (Ty::Int, Ty::Double) | (Ty::Double, Ty::Int) => Ty::Double,
            // Arithmetic on logicals promotes to integer, as in R
            (Ty::Logical, Ty::Int) | (Ty::Int, Ty::Logical) => Ty::Int,
            (Ty::Logical, Ty::Double) | (Ty::Double, Ty::Logical) => Ty::Double,
            (Ty::Vector(a), Ty::Vector(b)) => match a.join(b) {
                Ty::Unknown => Ty::Unknown,
                element => Ty::vector_of(element),
            },
            // Scalar/vector combination recycles the scalar
            (Ty::Vector(element), scalar) | (scalar, Ty::Vector(element)) => {
                match element.join(scalar) {
                    Ty::Unknown => Ty::Unknown,
                    element => Ty::vector_of(element),
                }
            }
            _ => Ty::Unknown,
        }
    }
}

impl core::fmt::Display for Ty {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Ty::Int => f.write_str("integer"),
            Ty::Double => f.write_str("double"),
            Ty::Logical => f.write_str("logical"),
            Ty::Char => f.write_str("character"),
            Ty::Vector(element) => write!(f, "vector<{element}>"),
            Ty::Record => f.write_str("record"),
            Ty::Unit => f.write_str("unit"),
            Ty::Unknown => f.write_str("unknown"),
        }
    }
}

impl Ty {
    pub fn colored(&self) -> colored::ColoredString {
        self.to_string().yellow()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_follows_r_numeric_promotion() {
        assert_eq!(Ty::Int.join(&Ty::Int), Ty::Int);
        assert_eq!(Ty::Int.join(&Ty::Double), Ty::Double);
        assert_eq!(Ty::Logical.join(&Ty::Int), Ty::Int);
        assert_eq!(Ty::Char.join(&Ty::Int), Ty::Unknown);
    }

    #[test]
    fn vectors_recycle_scalars() {
        assert_eq!(
            Ty::vector_of(Ty::Int).join(&Ty::Double),
            Ty::vector_of(Ty::Double)
        );
        assert_eq!(
            Ty::vector_of(Ty::Int).join(&Ty::vector_of(Ty::Int)),
            Ty::vector_of(Ty::Int)
        );
    }

    #[test]
    fn annotations_map_onto_the_lattice() {
        assert_eq!(Ty::from_annotation("int"), Some(Ty::Int));
        assert_eq!(Ty::from_annotation("f64"), Some(Ty::Double));
        assert_eq!(Ty::from_annotation("widget"), None);
    }
}
