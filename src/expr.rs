//! Expression trees.
//!
//! A plan expression is a sum type over constants, IU references, unary and
//! binary operators, short-circuit logic, casts, LIKE matching and N-way
//! CASE. Before lowering, [`Exp::check_semantics`] runs bottom-up type
//! inference and inserts implicit casts wherever operand precedences
//! disagree; lowering then dispatches per-kind through the type registry.

use cranelift_codegen::ir::{types, Value};

use crate::codegen::CodeGen;
use crate::error::EngineError;
use crate::iu::{Iu, IuSet};
use crate::types::{BinOp, TypeKind, UnOp};

/// A typed constant.
#[derive(Debug, Clone)]
pub enum Constant {
    Int32(i32),
    Int64(i64),
    Double(f64),
    Char(u8),
    Bool(bool),
    Date(u32),
    Str(String),
}

impl Constant {
    fn ty(&self) -> TypeKind {
        match self {
            Constant::Int32(_) => TypeKind::Int32,
            Constant::Int64(_) => TypeKind::Int64,
            Constant::Double(_) => TypeKind::Double,
            Constant::Char(_) => TypeKind::Char,
            Constant::Bool(_) => TypeKind::Bool,
            Constant::Date(_) => TypeKind::Date,
            Constant::Str(_) => TypeKind::String,
        }
    }
}

/// Which side of the pattern carried `%` wildcards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LikeKind {
    /// `pattern%`
    Prefix,
    /// `%pattern`
    Suffix,
    /// `%pattern%`
    Contains,
}

/// Logical connective with short-circuit evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicOp {
    And,
    Or,
}

/// A plan expression.
pub enum Exp {
    Const(Constant),
    Column(Iu),
    Unary {
        op: UnOp,
        child: Box<Exp>,
    },
    Binary {
        op: BinOp,
        lhs: Box<Exp>,
        rhs: Box<Exp>,
    },
    ShortCircuit {
        op: LogicOp,
        lhs: Box<Exp>,
        rhs: Box<Exp>,
    },
    Cast {
        to: TypeKind,
        child: Box<Exp>,
    },
    Like {
        kind: LikeKind,
        child: Box<Exp>,
        /// Pattern with its `%` markers already stripped.
        pattern: String,
    },
    Case {
        arms: Vec<(Exp, Exp)>,
        otherwise: Box<Exp>,
        ty: TypeKind,
    },
}

impl Exp {
    // -- constructors -------------------------------------------------------

    pub fn iu(iu: &Iu) -> Exp {
        Exp::Column(iu.clone())
    }

    pub fn int32(v: i32) -> Exp {
        Exp::Const(Constant::Int32(v))
    }

    pub fn int64(v: i64) -> Exp {
        Exp::Const(Constant::Int64(v))
    }

    pub fn double(v: f64) -> Exp {
        Exp::Const(Constant::Double(v))
    }

    pub fn date(julian: u32) -> Exp {
        Exp::Const(Constant::Date(julian))
    }

    pub fn string(v: impl Into<String>) -> Exp {
        Exp::Const(Constant::Str(v.into()))
    }

    pub fn binary(op: BinOp, lhs: Exp, rhs: Exp) -> Exp {
        Exp::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    pub fn and(lhs: Exp, rhs: Exp) -> Exp {
        Exp::ShortCircuit {
            op: LogicOp::And,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    pub fn or(lhs: Exp, rhs: Exp) -> Exp {
        Exp::ShortCircuit {
            op: LogicOp::Or,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    pub fn not(child: Exp) -> Exp {
        Exp::Unary {
            op: UnOp::Not,
            child: Box::new(child),
        }
    }

    pub fn extract_year(child: Exp) -> Exp {
        Exp::Unary {
            op: UnOp::ExtractYear,
            child: Box::new(child),
        }
    }

    /// Build a LIKE match from a `%`-decorated pattern; the wildcard
    /// placement picks the runtime entry point and is stripped here, at
    /// plan time.
    pub fn like(child: Exp, pattern: &str) -> Result<Exp, EngineError> {
        let starts = pattern.starts_with('%');
        let ends = pattern.ends_with('%') && pattern.len() > 1;
        let kind = match (starts, ends) {
            (true, true) => LikeKind::Contains,
            (false, true) => LikeKind::Prefix,
            (true, false) => LikeKind::Suffix,
            (false, false) => {
                return Err(EngineError::UnsupportedLikePattern(pattern.to_string()))
            }
        };
        let mut stripped = pattern;
        if starts {
            stripped = &stripped[1..];
        }
        if ends {
            stripped = &stripped[..stripped.len() - 1];
        }
        Ok(Exp::Like {
            kind,
            child: Box::new(child),
            pattern: stripped.to_string(),
        })
    }

    pub fn case(arms: Vec<(Exp, Exp)>, otherwise: Exp, ty: TypeKind) -> Exp {
        Exp::Case {
            arms,
            otherwise: Box::new(otherwise),
            ty,
        }
    }

    /// Name-based binary factory. Unknown names are rejected at plan time.
    pub fn call(name: &str, lhs: Exp, rhs: Exp) -> Result<Exp, EngineError> {
        let exp = match name {
            "eq" => Exp::binary(BinOp::Eq, lhs, rhs),
            "ne" => Exp::binary(BinOp::Ne, lhs, rhs),
            "lt" => Exp::binary(BinOp::Lt, lhs, rhs),
            "le" => Exp::binary(BinOp::Le, lhs, rhs),
            "gt" => Exp::binary(BinOp::Gt, lhs, rhs),
            "ge" => Exp::binary(BinOp::Ge, lhs, rhs),
            "add" => Exp::binary(BinOp::Add, lhs, rhs),
            "sub" => Exp::binary(BinOp::Sub, lhs, rhs),
            "mul" => Exp::binary(BinOp::Mul, lhs, rhs),
            "div" => Exp::binary(BinOp::Div, lhs, rhs),
            "and" => Exp::and(lhs, rhs),
            "or" => Exp::or(lhs, rhs),
            _ => return Err(EngineError::UnknownOperator(name.to_string())),
        };
        Ok(exp)
    }

    // -- analysis -----------------------------------------------------------

    /// All IUs the expression reads.
    pub fn ius(&self) -> IuSet {
        let mut set = IuSet::new();
        self.collect_ius(&mut set);
        set
    }

    fn collect_ius(&self, set: &mut IuSet) {
        match self {
            Exp::Const(_) => {}
            Exp::Column(iu) => set.add(iu.clone()),
            Exp::Unary { child, .. } | Exp::Cast { child, .. } | Exp::Like { child, .. } => {
                child.collect_ius(set);
            }
            Exp::Binary { lhs, rhs, .. } | Exp::ShortCircuit { lhs, rhs, .. } => {
                lhs.collect_ius(set);
                rhs.collect_ius(set);
            }
            Exp::Case {
                arms, otherwise, ..
            } => {
                for (cond, value) in arms {
                    cond.collect_ius(set);
                    value.collect_ius(set);
                }
                otherwise.collect_ius(set);
            }
        }
    }

    /// Result type after semantic checking.
    pub fn result_type(&self) -> TypeKind {
        match self {
            Exp::Const(c) => c.ty(),
            Exp::Column(iu) => iu.ty(),
            Exp::Unary { op, child } => match op {
                UnOp::ExtractYear => TypeKind::Int32,
                UnOp::Not => child.result_type(),
            },
            Exp::Binary { op, lhs, .. } => {
                if op.is_comparison() {
                    TypeKind::Bool
                } else {
                    lhs.result_type()
                }
            }
            Exp::ShortCircuit { .. } | Exp::Like { .. } => TypeKind::Bool,
            Exp::Cast { to, .. } => *to,
            Exp::Case { ty, .. } => *ty,
        }
    }

    /// Bottom-up type inference. Wraps the lower-precedence operand of a
    /// binary node (and low-precedence CASE arms) in implicit casts.
    /// Idempotent, so replayed compilation of a reused plan is fine.
    pub fn check_semantics(&mut self) -> Result<TypeKind, EngineError> {
        match self {
            Exp::Const(c) => Ok(c.ty()),
            Exp::Column(iu) => Ok(iu.ty()),
            Exp::Unary { op, child } => {
                let child_ty = child.check_semantics()?;
                Ok(match op {
                    UnOp::ExtractYear => TypeKind::Int32,
                    UnOp::Not => child_ty,
                })
            }
            Exp::Binary { op, lhs, rhs } => {
                let left = lhs.check_semantics()?;
                let right = rhs.check_semantics()?;
                let operand = if left == right {
                    left
                } else if left.precedence() < right.precedence() {
                    wrap_cast(lhs, right);
                    right
                } else {
                    wrap_cast(rhs, left);
                    left
                };
                Ok(if op.is_comparison() {
                    TypeKind::Bool
                } else {
                    operand
                })
            }
            Exp::ShortCircuit { lhs, rhs, .. } => {
                lhs.check_semantics()?;
                rhs.check_semantics()?;
                Ok(TypeKind::Bool)
            }
            Exp::Cast { to, child } => {
                child.check_semantics()?;
                Ok(*to)
            }
            Exp::Like { child, .. } => {
                let child_ty = child.check_semantics()?;
                if child_ty != TypeKind::String {
                    return Err(EngineError::UnsupportedOperation {
                        op: "LIKE",
                        ty: child_ty,
                    });
                }
                Ok(TypeKind::Bool)
            }
            Exp::Case {
                arms,
                otherwise,
                ty,
            } => {
                for (cond, value) in arms.iter_mut() {
                    cond.check_semantics()?;
                    let arm_ty = value.check_semantics()?;
                    if arm_ty.precedence() < ty.precedence() {
                        wrap_cast_exp(value, *ty);
                    }
                }
                let else_ty = otherwise.check_semantics()?;
                if else_ty.precedence() < ty.precedence() {
                    wrap_cast(otherwise, *ty);
                }
                Ok(*ty)
            }
        }
    }

    /// Type-check and lower in one step.
    pub fn compile(&mut self, cg: &mut CodeGen) -> Result<Value, EngineError> {
        self.check_semantics()?;
        self.eval(cg)
    }

    // -- lowering -----------------------------------------------------------

    fn eval(&self, cg: &mut CodeGen) -> Result<Value, EngineError> {
        match self {
            Exp::Const(c) => Ok(match *c {
                Constant::Int32(v) => cg.iconst(types::I32, i64::from(v)),
                Constant::Int64(v) => cg.iconst(types::I64, v),
                Constant::Double(v) => cg.f64const(v),
                Constant::Char(v) => cg.iconst(types::I8, i64::from(v)),
                Constant::Bool(v) => cg.iconst(types::I8, i64::from(v)),
                Constant::Date(v) => cg.iconst(types::I32, i64::from(v)),
                Constant::Str(ref s) => cg.string_view_const(s.as_bytes()),
            }),
            Exp::Column(iu) => Ok(cg
                .scope
                .value(iu)
                .unwrap_or_else(|| panic!("{iu:?} not in scope"))),
            Exp::Unary { op, child } => {
                let value = child.eval(cg)?;
                child.result_type().unop(cg, *op, value)
            }
            Exp::Binary { op, lhs, rhs } => {
                let operand_ty = lhs.result_type();
                let left = lhs.eval(cg)?;
                let right = rhs.eval(cg)?;
                operand_ty.binop(cg, *op, left, right)
            }
            Exp::ShortCircuit { op, lhs, rhs } => {
                let left = lhs.eval(cg)?;
                let left_block = cg.cur_block();

                let rhs_block = cg.new_block();
                let merge = cg.new_block();
                let result = cg.append_block_param(merge, types::I8);

                cg.switch_to(rhs_block);
                let right = rhs.eval(cg)?;
                cg.jump(merge, &[right]);

                cg.switch_to(left_block);
                match op {
                    LogicOp::And => cg.brif(left, rhs_block, &[], merge, &[left]),
                    LogicOp::Or => cg.brif(left, merge, &[left], rhs_block, &[]),
                }
                cg.switch_to(merge);
                Ok(result)
            }
            Exp::Cast { to, child } => {
                let value = child.eval(cg)?;
                Ok(child.result_type().cast(cg, value, *to))
            }
            Exp::Like {
                kind,
                child,
                pattern,
            } => {
                let value = child.eval(cg)?;
                let pat = cg.bytes_const(pattern.as_bytes());
                let len = cg.i64const(pattern.len() as i64);
                let helper = match kind {
                    LikeKind::Prefix => "like_prefix",
                    LikeKind::Suffix => "like_suffix",
                    LikeKind::Contains => "like",
                };
                cg.call_rt1(helper, &[value, pat, len], types::I8)
            }
            Exp::Case {
                arms,
                otherwise,
                ty,
            } => {
                let merge = cg.new_block();
                let result_ty = ty.clif(cg.ptr_ty());
                let result = cg.append_block_param(merge, result_ty);

                for (cond, value) in arms {
                    let test = cond.eval(cg)?;
                    let body = cg.new_block();
                    let next = cg.new_block();
                    cg.brif(test, body, &[], next, &[]);
                    cg.switch_to(body);
                    let v = value.eval(cg)?;
                    cg.jump(merge, &[v]);
                    cg.switch_to(next);
                }
                let fallback = otherwise.eval(cg)?;
                cg.jump(merge, &[fallback]);
                cg.switch_to(merge);
                Ok(result)
            }
        }
    }
}

fn wrap_cast(slot: &mut Box<Exp>, to: TypeKind) {
    let child = std::mem::replace(slot, Box::new(Exp::Const(Constant::Bool(false))));
    *slot = Box::new(Exp::Cast { to, child });
}

fn wrap_cast_exp(slot: &mut Exp, to: TypeKind) {
    let child = std::mem::replace(slot, Exp::Const(Constant::Bool(false)));
    *slot = Exp::Cast {
        to,
        child: Box::new(child),
    };
}
