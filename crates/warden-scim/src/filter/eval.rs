// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use super::ast::{CompareOp, Filter, FilterValue, LogicalOp};
use std::cmp::Ordering;

/// Evaluates a filter against an attribute lookup.
///
/// Negation is pushed down to the comparisons instead of complementing the
/// result: `not (a eq v)` is `a ne v` and holds only when the attribute is
/// present with a different value, `not (a gt v)` is `a le v`, and only
/// `not (a pr)` accepts absence. This keeps the evaluator in exact
/// agreement with a storage-side rewrite of the same filter, where an
/// absent attribute fails every rewritten comparison.
///
/// Comparison semantics are typed and exact: values of different kinds
/// never compare, and strings order bytewise (matching how a wide-column
/// store orders string keys).
pub fn evaluate_filter<F>(filter: &Filter, get_attr: &F) -> bool
where
	F: Fn(&str) -> Option<FilterValue>,
{
	evaluate(filter, get_attr, false)
}

fn evaluate<F>(filter: &Filter, get_attr: &F, negated: bool) -> bool
where
	F: Fn(&str) -> Option<FilterValue>,
{
	match filter {
		Filter::Compare {
			attr_path,
			op,
			value,
		} => evaluate_compare(
			get_attr(attr_path).as_ref(),
			*op,
			value.as_ref(),
			negated,
		),
		Filter::Logical { op, left, right } => {
			// De Morgan: negation swaps the connective.
			let conjunction = matches!(op, LogicalOp::And) != negated;
			if conjunction {
				evaluate(left, get_attr, negated) && evaluate(right, get_attr, negated)
			} else {
				evaluate(left, get_attr, negated) || evaluate(right, get_attr, negated)
			}
		}
		Filter::Not(inner) => evaluate(inner, get_attr, !negated),
		Filter::Group(inner) => evaluate(inner, get_attr, negated),
	}
}

/// One comparison in negation-normal form: `(op, negated)` is first mapped
/// to the effective comparison, which then fails on an absent or mistyped
/// attribute regardless of polarity. Presence tests are the one exception.
fn evaluate_compare(
	attr: Option<&FilterValue>,
	op: CompareOp,
	value: Option<&FilterValue>,
	negated: bool,
) -> bool {
	match (op, negated) {
		(CompareOp::Pr, false) => attr.is_some(),
		(CompareOp::Pr, true) => attr.is_none(),
		(CompareOp::Eq, false) | (CompareOp::Ne, true) => compare(attr, value)
			.map(|ord| ord == Ordering::Equal)
			.unwrap_or(false),
		(CompareOp::Eq, true) | (CompareOp::Ne, false) => compare(attr, value)
			.map(|ord| ord != Ordering::Equal)
			.unwrap_or(false),
		(CompareOp::Gt, false) | (CompareOp::Le, true) => holds(attr, value, Ordering::is_gt),
		(CompareOp::Le, false) | (CompareOp::Gt, true) => holds(attr, value, Ordering::is_le),
		(CompareOp::Lt, false) | (CompareOp::Ge, true) => holds(attr, value, Ordering::is_lt),
		(CompareOp::Ge, false) | (CompareOp::Lt, true) => holds(attr, value, Ordering::is_ge),
		(CompareOp::Sw, flipped) => str_pair(attr, value)
			.map(|(a, v)| a.starts_with(v) != flipped)
			.unwrap_or(false),
		(CompareOp::Co, flipped) => str_pair(attr, value)
			.map(|(a, v)| a.contains(v) != flipped)
			.unwrap_or(false),
		(CompareOp::Ew, flipped) => str_pair(attr, value)
			.map(|(a, v)| a.ends_with(v) != flipped)
			.unwrap_or(false),
	}
}

fn compare(attr: Option<&FilterValue>, value: Option<&FilterValue>) -> Option<Ordering> {
	match (attr?, value?) {
		// Bytewise, matching the store's string key ordering.
		(FilterValue::Str(a), FilterValue::Str(v)) => Some(a.as_bytes().cmp(v.as_bytes())),
		(FilterValue::Number(a), FilterValue::Number(v)) => Some(a.cmp(v)),
		(FilterValue::Bool(a), FilterValue::Bool(v)) => Some(a.cmp(v)),
		_ => None,
	}
}

fn holds(
	attr: Option<&FilterValue>,
	value: Option<&FilterValue>,
	accept: fn(Ordering) -> bool,
) -> bool {
	compare(attr, value).map(accept).unwrap_or(false)
}

fn str_pair<'a>(
	attr: Option<&'a FilterValue>,
	value: Option<&'a FilterValue>,
) -> Option<(&'a str, &'a str)> {
	match (attr?, value?) {
		(FilterValue::Str(a), FilterValue::Str(v)) => Some((a.as_str(), v.as_str())),
		_ => None,
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::filter::FilterParser;
	use std::collections::HashMap;

	fn eval(filter: &str, attrs: &[(&str, FilterValue)]) -> bool {
		let filter = FilterParser::parse(filter).unwrap();
		let map: HashMap<String, FilterValue> = attrs
			.iter()
			.map(|(k, v)| (k.to_string(), v.clone()))
			.collect();
		evaluate_filter(&filter, &|attr| map.get(attr).cloned())
	}

	#[test]
	fn eq_and_pr() {
		let attrs = [("userName", FilterValue::Str("alice".into()))];
		assert!(eval(r#"userName eq "alice""#, &attrs));
		assert!(!eval(r#"userName eq "Alice""#, &attrs));
		assert!(eval("userName pr", &attrs));
		assert!(!eval("email pr", &attrs));
	}

	#[test]
	fn ne_requires_presence() {
		let attrs = [("status", FilterValue::Str("issued".into()))];
		assert!(eval(r#"status ne "revoked""#, &attrs));
		assert!(!eval(r#"status ne "issued""#, &attrs));
		assert!(!eval(r#"owner ne "u1""#, &attrs));
	}

	#[test]
	fn negated_comparisons_require_presence() {
		// `not (a eq v)` is `a ne v`: an absent attribute fails the
		// comparison and its negation alike.
		assert!(!eval(r#"not (owner eq "u1")"#, &[]));
		assert_eq!(
			eval(r#"not (owner eq "u1")"#, &[]),
			eval(r#"owner ne "u1""#, &[]),
		);
		let attrs = [("owner", FilterValue::Str("u2".into()))];
		assert!(eval(r#"not (owner eq "u1")"#, &attrs));
		assert!(!eval(r#"not (owner eq "u2")"#, &attrs));

		// Ordering flips rather than complements.
		let expires = [("expires", FilterValue::Number(10))];
		assert!(eval("not (expires gt 10)", &expires));
		assert!(!eval("not (expires gt 10)", &[]));

		// Only the presence test itself accepts absence.
		assert!(eval("not (owner pr)", &[]));
		assert!(!eval("not (owner pr)", &attrs));

		// Double negation restores the plain comparison.
		assert!(!eval(r#"not (not (owner eq "u1"))"#, &[]));
		assert!(!eval(r#"not (not (owner eq "u1"))"#, &attrs));

		// Negated substring tests still require presence.
		assert!(!eval(r#"not (owner sw "u")"#, &[]));
		assert!(!eval(r#"not (owner sw "u")"#, &attrs));
		assert!(eval(r#"not (owner sw "x")"#, &attrs));
	}

	#[test]
	fn de_morgan_under_negation() {
		let attrs = [("status", FilterValue::Str("issued".into()))];
		// not (A or B) holds only when both rewritten legs hold.
		assert!(eval(
			r#"not (status eq "revoked" or status eq "expired")"#,
			&attrs
		));
		assert!(!eval(
			r#"not (status eq "issued" or status eq "expired")"#,
			&attrs
		));
		// With the attribute absent, both rewritten legs fail.
		assert!(!eval(
			r#"not (status eq "revoked" or status eq "expired")"#,
			&[]
		));
		// not (A and B) needs one rewritten leg to hold.
		assert!(eval(
			r#"not (status eq "revoked" and status pr)"#,
			&attrs
		));
	}

	#[test]
	fn numeric_ordering() {
		let attrs = [("expires", FilterValue::Number(1000))];
		assert!(eval("expires gt 999", &attrs));
		assert!(eval("expires le 1000", &attrs));
		assert!(!eval("expires lt 1000", &attrs));
		// Kind mismatch never compares, in either polarity.
		assert!(!eval(r#"expires gt "999""#, &attrs));
		assert!(!eval(r#"not (expires gt "999")"#, &attrs));
	}

	#[test]
	fn string_prefix_and_logical() {
		let attrs = [
			("userName", FilterValue::Str("alice".into())),
			("active", FilterValue::Bool(true)),
		];
		assert!(eval(r#"userName sw "al" and active eq true"#, &attrs));
		assert!(eval(r#"userName sw "zz" or active eq true"#, &attrs));
		assert!(!eval(r#"not (active eq true)"#, &attrs));
	}

	#[test]
	fn ne_matches_range_split() {
		// `a ne v` must accept exactly the items `a lt v or a gt v` accepts.
		for value in ["aaa", "mmm", "zzz"] {
			let attrs = [("name", FilterValue::Str(value.into()))];
			assert_eq!(
				eval(r#"name ne "mmm""#, &attrs),
				eval(r#"name lt "mmm" or name gt "mmm""#, &attrs),
			);
		}
		assert_eq!(
			eval(r#"name ne "mmm""#, &[]),
			eval(r#"name lt "mmm" or name gt "mmm""#, &[]),
		);
	}
}
