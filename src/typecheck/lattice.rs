//! The 16-type primitive lattice and `common_type`, reproduced field-for-
//! field from `pt_common_type` in `original_source/.../type_checking.c`
//! (SPEC_FULL §4.5 supplement). The finite tag set matches spec.md §3
//! "Types (type-checker view)" verbatim.

use crate::config::CompatMode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tag {
    None,
    Na,
    Null,
    Maybe,
    Logical,
    Integer,
    Bigint,
    Smallint,
    Float,
    Double,
    Numeric,
    Monetary,
    Date,
    Time,
    Timestamp,
    Datetime,
    Char,
    Varchar,
    Nchar,
    Varnchar,
    Bit,
    Varbit,
    Object,
    Set,
    Multiset,
    Sequence,
}

/// The 16 primitive types the lattice law (spec.md §8, property 6) is
/// quantified over — excludes NONE/NA/NULL/MAYBE (handled as absorbing /
/// identity elements, not lattice members) and the charset/collection
/// variants (NCHAR/VARNCHAR/OBJECT/SET/MULTISET/SEQUENCE).
pub const PRIMITIVE_16: [Tag; 16] = [
    Tag::Logical,
    Tag::Integer,
    Tag::Bigint,
    Tag::Smallint,
    Tag::Float,
    Tag::Double,
    Tag::Numeric,
    Tag::Monetary,
    Tag::Date,
    Tag::Time,
    Tag::Timestamp,
    Tag::Datetime,
    Tag::Char,
    Tag::Varchar,
    Tag::Bit,
    Tag::Varbit,
];

fn numeric_rank(t: Tag) -> Option<u8> {
    match t {
        Tag::Smallint => Some(0),
        Tag::Integer => Some(1),
        Tag::Bigint => Some(2),
        Tag::Numeric => Some(3),
        Tag::Float => Some(4),
        Tag::Double => Some(5),
        Tag::Monetary => Some(6),
        _ => None,
    }
}

fn is_integer_family(t: Tag) -> bool {
    matches!(t, Tag::Smallint | Tag::Integer | Tag::Bigint)
}

/// DATETIME dominates TIMESTAMP dominates DATE (spec.md §4.5). TIME has no
/// rank in this chain — it never combines directly with DATE/TIMESTAMP/
/// DATETIME, only with itself, the integer family, and the char families
/// (see `is_temporal` for the wider membership test those rules use).
fn temporal_rank(t: Tag) -> Option<u8> {
    match t {
        Tag::Date => Some(0),
        Tag::Timestamp => Some(1),
        Tag::Datetime => Some(2),
        _ => None,
    }
}

/// Every temporal tag, including TIME — used by the rules that only care
/// "is this a temporal type" rather than where it ranks in the DATE <
/// TIMESTAMP < DATETIME dominance chain.
fn is_temporal(t: Tag) -> bool {
    matches!(t, Tag::Date | Tag::Time | Tag::Timestamp | Tag::Datetime)
}

fn is_char_family(t: Tag) -> bool {
    matches!(t, Tag::Char | Tag::Varchar)
}

fn is_nchar_family(t: Tag) -> bool {
    matches!(t, Tag::Nchar | Tag::Varnchar)
}

fn is_bit_family(t: Tag) -> bool {
    matches!(t, Tag::Bit | Tag::Varbit)
}

fn is_collection(t: Tag) -> bool {
    matches!(t, Tag::Set | Tag::Multiset | Tag::Sequence)
}

/// Least upper bound of `a` and `b` in the 16-type lattice, or `None` if
/// no common type exists (`pt_common_type` returning `PT_TYPE_NONE`).
///
/// Idempotent, commutative, and associative over `PRIMITIVE_16` by
/// construction: every branch below resolves via an order-independent
/// membership test rather than a one-sided `match arg1 { ... }` the way
/// the original C switch reads (the original *is* symmetric in outcome,
/// just asymmetric in how the case arms are written — see SPEC_FULL §4.5).
pub fn common_type(a: Tag, b: Tag, compat: CompatMode) -> Option<Tag> {
    if a == b {
        return Some(a);
    }

    // MAYBE is identity: an unbound host-var parameter resolves to
    // whatever concrete type the other side carries.
    if a == Tag::Maybe {
        return Some(b);
    }
    if b == Tag::Maybe {
        return Some(a);
    }

    // NULL absorbs into the other operand's type for every op except set
    // union over collection types, where it does not participate in the
    // join at all (spec.md §4.5) — modeled here as "stay NULL".
    if a == Tag::Null {
        return Some(if is_collection(b) { Tag::Null } else { b });
    }
    if b == Tag::Null {
        return Some(if is_collection(a) { Tag::Null } else { a });
    }

    // NONE/NA mark a badly formed expression; they never resolve to a
    // usable type.
    if matches!(a, Tag::None | Tag::Na) || matches!(b, Tag::None | Tag::Na) {
        return None;
    }

    if let (Some(ra), Some(rb)) = (numeric_rank(a), numeric_rank(b)) {
        return Some(if ra >= rb { a } else { b });
    }

    if let (Some(ra), Some(rb)) = (temporal_rank(a), temporal_rank(b)) {
        return Some(if ra >= rb { a } else { b });
    }

    // INTEGER family combined with a temporal type (DATE/TIME/TIMESTAMP/
    // DATETIME): the original's switch resolves to the temporal type
    // (`case PT_TYPE_INTEGER: case PT_TYPE_DATE: common_type = PT_TYPE_DATE;`
    // etc, and the `PT_TYPE_TIME` arm lists SMALLINT/INTEGER/BIGINT the same
    // way). `compat_mode = Mysql` flips the preference to the integer type
    // (SPEC_FULL §4.5).
    let (int_side, temp_side) = if is_integer_family(a) && is_temporal(b) {
        (Some(a), Some(b))
    } else if is_integer_family(b) && is_temporal(a) {
        (Some(b), Some(a))
    } else {
        (None, None)
    };
    if let (Some(int_ty), Some(temp_ty)) = (int_side, temp_side) {
        return Some(match compat {
            CompatMode::Mysql => int_ty,
            _ => temp_ty,
        });
    }

    // CHAR/VARCHAR/NCHAR/VARNCHAR combined with any temporal type resolves
    // to the temporal type (`pt_common_type`'s PT_TYPE_CHAR/PT_TYPE_DATE/
    // PT_TYPE_TIME/PT_TYPE_TIMESTAMP/PT_TYPE_DATETIME case arms all include
    // the opposite char/temporal family — SPEC_FULL §4.5).
    if (is_char_family(a) || is_nchar_family(a)) && is_temporal(b) {
        return Some(b);
    }
    if (is_char_family(b) || is_nchar_family(b)) && is_temporal(a) {
        return Some(a);
    }

    if is_char_family(a) && is_char_family(b) {
        return Some(Tag::Varchar);
    }
    if is_nchar_family(a) && is_nchar_family(b) {
        return Some(Tag::Varnchar);
    }
    if is_bit_family(a) && is_bit_family(b) {
        return Some(Tag::Varbit);
    }

    None
}
