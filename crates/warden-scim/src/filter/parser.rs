// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use super::ast::{CompareOp, Filter, FilterValue, LogicalOp};
use crate::error::ScimError;
use winnow::ascii::{alpha1, alphanumeric1, space0, space1};
use winnow::combinator::{alt, repeat};
use winnow::error::ContextError;
use winnow::prelude::*;
use winnow::token::take_while;

pub struct FilterParser;

impl FilterParser {
	pub fn parse(input: &str) -> Result<Filter, ScimError> {
		parse_filter
			.parse(input.trim())
			.map_err(|e| ScimError::InvalidFilter(format!("{:?}", e)))
	}
}

fn parse_filter(input: &mut &str) -> Result<Filter, ContextError> {
	parse_or_expr(input)
}

fn parse_or_expr(input: &mut &str) -> Result<Filter, ContextError> {
	let left = parse_and_expr(input)?;
	let mut result = left;

	loop {
		let checkpoint = *input;
		let space_result: Result<&str, ContextError> = space1.parse_next(input);
		if space_result.is_err() {
			*input = checkpoint;
			break;
		}
		let or_result: Result<&str, ContextError> = winnow::ascii::Caseless("or").parse_next(input);
		if or_result.is_err() {
			*input = checkpoint;
			break;
		}
		let _: &str = space1.parse_next(input)?;
		let right = parse_and_expr(input)?;
		result = Filter::Logical {
			op: LogicalOp::Or,
			left: Box::new(result),
			right: Box::new(right),
		};
	}

	Ok(result)
}

fn parse_and_expr(input: &mut &str) -> Result<Filter, ContextError> {
	let left = parse_not_expr(input)?;
	let mut result = left;

	loop {
		let checkpoint = *input;
		let space_result: Result<&str, ContextError> = space1.parse_next(input);
		if space_result.is_err() {
			*input = checkpoint;
			break;
		}
		let and_result: Result<&str, ContextError> = winnow::ascii::Caseless("and").parse_next(input);
		if and_result.is_err() {
			*input = checkpoint;
			break;
		}
		let _: &str = space1.parse_next(input)?;
		let right = parse_not_expr(input)?;
		result = Filter::Logical {
			op: LogicalOp::And,
			left: Box::new(result),
			right: Box::new(right),
		};
	}

	Ok(result)
}

fn parse_not_expr(input: &mut &str) -> Result<Filter, ContextError> {
	let checkpoint = *input;
	let not_result: Result<&str, ContextError> = winnow::ascii::Caseless("not").parse_next(input);
	// "not" must be followed by whitespace or a group, otherwise it is an
	// attribute name prefix (e.g. "notes").
	if not_result.is_ok() && (input.starts_with('(') || input.starts_with(char::is_whitespace)) {
		let _: &str = space0.parse_next(input)?;
		let expr = parse_atom(input)?;
		return Ok(Filter::Not(Box::new(expr)));
	}
	*input = checkpoint;
	parse_atom(input)
}

fn parse_atom(input: &mut &str) -> Result<Filter, ContextError> {
	let _: &str = space0.parse_next(input)?;

	if input.starts_with('(') {
		let _ = '('.parse_next(input)?;
		let _: &str = space0.parse_next(input)?;
		let filter = parse_filter(input)?;
		let _: &str = space0.parse_next(input)?;
		let _ = ')'.parse_next(input)?;
		return Ok(Filter::Group(Box::new(filter)));
	}

	parse_comparison(input)
}

fn parse_comparison(input: &mut &str) -> Result<Filter, ContextError> {
	let attr_path = parse_attr_path(input)?;
	let _: &str = space1.parse_next(input)?;

	let checkpoint = *input;
	let pr_result: Result<&str, ContextError> = winnow::ascii::Caseless("pr").parse_next(input);
	if pr_result.is_ok() && !input.starts_with(|c: char| c.is_alphanumeric()) {
		return Ok(Filter::Compare {
			attr_path,
			op: CompareOp::Pr,
			value: None,
		});
	}
	*input = checkpoint;

	let op = parse_compare_op(input)?;
	let _: &str = space1.parse_next(input)?;
	let value = parse_value(input)?;

	Ok(Filter::Compare {
		attr_path,
		op,
		value: Some(value),
	})
}

fn parse_attr_path(input: &mut &str) -> Result<String, ContextError> {
	let first: &str = alpha1.parse_next(input)?;
	let rest: String = repeat(
		0..,
		alt((
			alphanumeric1,
			".".map(|_: &str| "."),
			":".map(|_: &str| ":"),
			"_".map(|_: &str| "_"),
		)),
	)
	.fold(String::new, |mut acc, s: &str| {
		acc.push_str(s);
		acc
	})
	.parse_next(input)?;
	Ok(format!("{}{}", first, rest))
}

fn parse_compare_op(input: &mut &str) -> Result<CompareOp, ContextError> {
	alt((
		winnow::ascii::Caseless("eq").map(|_| CompareOp::Eq),
		winnow::ascii::Caseless("ne").map(|_| CompareOp::Ne),
		winnow::ascii::Caseless("co").map(|_| CompareOp::Co),
		winnow::ascii::Caseless("sw").map(|_| CompareOp::Sw),
		winnow::ascii::Caseless("ew").map(|_| CompareOp::Ew),
		winnow::ascii::Caseless("gt").map(|_| CompareOp::Gt),
		winnow::ascii::Caseless("ge").map(|_| CompareOp::Ge),
		winnow::ascii::Caseless("lt").map(|_| CompareOp::Lt),
		winnow::ascii::Caseless("le").map(|_| CompareOp::Le),
	))
	.parse_next(input)
}

fn parse_value(input: &mut &str) -> Result<FilterValue, ContextError> {
	if input.starts_with('"') {
		let _ = '"'.parse_next(input)?;
		let value: String = take_while(0.., |c| c != '"').parse_next(input)?.to_string();
		let _ = '"'.parse_next(input)?;
		return Ok(FilterValue::Str(value));
	}

	let token: String = take_while(1.., |c: char| !c.is_whitespace() && c != ')')
		.parse_next(input)?
		.to_string();
	if token.eq_ignore_ascii_case("true") {
		return Ok(FilterValue::Bool(true));
	}
	if token.eq_ignore_ascii_case("false") {
		return Ok(FilterValue::Bool(false));
	}
	if let Ok(number) = token.parse::<i64>() {
		return Ok(FilterValue::Number(number));
	}
	Ok(FilterValue::Str(token))
}

#[cfg(test)]
mod tests {
	use super::*;
	use proptest::prelude::*;

	#[test]
	fn simple_eq() {
		let result = FilterParser::parse(r#"userName eq "john""#).unwrap();
		assert_eq!(
			result,
			Filter::Compare {
				attr_path: "userName".to_string(),
				op: CompareOp::Eq,
				value: Some(FilterValue::Str("john".to_string())),
			}
		);
	}

	#[test]
	fn and_expr() {
		let result = FilterParser::parse(r#"userName eq "john" and active eq true"#).unwrap();
		assert!(matches!(
			result,
			Filter::Logical {
				op: LogicalOp::And,
				..
			}
		));
	}

	#[test]
	fn or_binds_weaker_than_and() {
		let result =
			FilterParser::parse(r#"a eq 1 or b eq 2 and c eq 3"#).unwrap();
		match result {
			Filter::Logical { op, right, .. } => {
				assert_eq!(op, LogicalOp::Or);
				assert!(matches!(
					*right,
					Filter::Logical {
						op: LogicalOp::And,
						..
					}
				));
			}
			other => panic!("unexpected parse: {:?}", other),
		}
	}

	#[test]
	fn pr_operator() {
		let result = FilterParser::parse("emails pr").unwrap();
		assert!(matches!(
			result,
			Filter::Compare {
				op: CompareOp::Pr,
				value: None,
				..
			}
		));
	}

	#[test]
	fn pr_prefixed_value_is_not_pr() {
		// "pr" followed by an alphanumeric continues as an operator keyword
		// lookup, not a presence test.
		let result = FilterParser::parse(r#"status eq "pr1""#).unwrap();
		assert!(matches!(
			result,
			Filter::Compare {
				op: CompareOp::Eq,
				..
			}
		));
	}

	#[test]
	fn not_group() {
		let result = FilterParser::parse(r#"not (userName eq "john")"#).unwrap();
		assert!(matches!(result, Filter::Not(_)));
	}

	#[test]
	fn attr_starting_with_not_is_a_path() {
		let result = FilterParser::parse(r#"notes eq "x""#).unwrap();
		assert!(matches!(
			result,
			Filter::Compare { attr_path, .. } if attr_path == "notes"
		));
	}

	#[test]
	fn typed_values() {
		let result = FilterParser::parse("expires gt 1234").unwrap();
		assert!(matches!(
			result,
			Filter::Compare {
				value: Some(FilterValue::Number(1234)),
				..
			}
		));
		let result = FilterParser::parse("active eq false").unwrap();
		assert!(matches!(
			result,
			Filter::Compare {
				value: Some(FilterValue::Bool(false)),
				..
			}
		));
	}

	#[test]
	fn quoted_number_stays_string() {
		let result = FilterParser::parse(r#"phone eq "1234""#).unwrap();
		assert!(matches!(
			result,
			Filter::Compare {
				value: Some(FilterValue::Str(_)),
				..
			}
		));
	}

	#[test]
	fn nested_groups() {
		let result =
			FilterParser::parse(r#"(a eq 1 or b eq 2) and not (c pr)"#).unwrap();
		match result {
			Filter::Logical { op, left, right } => {
				assert_eq!(op, LogicalOp::And);
				assert!(matches!(*left, Filter::Group(_)));
				assert!(matches!(*right, Filter::Not(_)));
			}
			other => panic!("unexpected parse: {:?}", other),
		}
	}

	#[test]
	fn rejects_garbage() {
		assert!(FilterParser::parse("").is_err());
		assert!(FilterParser::parse("userName eq").is_err());
		assert!(FilterParser::parse("(userName eq \"a\"").is_err());
		assert!(FilterParser::parse("eq \"a\"").is_err());
	}

	// Generates well-formed filter trees: logical operands that are
	// themselves logical nodes are wrapped in explicit groups, so rendering
	// and re-parsing is exact.
	fn arb_filter() -> impl Strategy<Value = Filter> {
		let leaf = (
			"[a-z][a-zA-Z0-9]{0,8}"
				.prop_filter("'not' is a keyword", |s| !s.eq_ignore_ascii_case("not")),
			prop_oneof![
				Just(CompareOp::Eq),
				Just(CompareOp::Ne),
				Just(CompareOp::Gt),
				Just(CompareOp::Ge),
				Just(CompareOp::Lt),
				Just(CompareOp::Le),
				Just(CompareOp::Sw),
			],
			prop_oneof![
				"[a-zA-Z0-9 ._-]{0,12}".prop_map(FilterValue::Str),
				any::<i64>().prop_map(FilterValue::Number),
				any::<bool>().prop_map(FilterValue::Bool),
			],
		)
			.prop_map(|(attr_path, op, value)| Filter::Compare {
				attr_path,
				op,
				value: Some(value),
			});

		leaf.prop_recursive(4, 32, 2, |inner| {
			let grouped = inner.clone().prop_map(|f| match f {
				logical @ Filter::Logical { .. } => Filter::Group(Box::new(logical)),
				other => other,
			});
			prop_oneof![
				(grouped.clone(), grouped.clone(), any::<bool>()).prop_map(
					|(left, right, is_and)| Filter::Logical {
						op: if is_and { LogicalOp::And } else { LogicalOp::Or },
						left: Box::new(left),
						right: Box::new(right),
					}
				),
				grouped.prop_map(|f| match f {
					compare @ Filter::Compare { .. } => Filter::Not(Box::new(compare)),
					other => Filter::Not(Box::new(Filter::Group(Box::new(other)))),
				}),
			]
		})
	}

	proptest! {
		#[test]
		fn render_parse_round_trip(filter in arb_filter()) {
			let rendered = filter.to_string();
			let parsed = FilterParser::parse(&rendered).unwrap();
			prop_assert_eq!(parsed, filter);
		}
	}
}
