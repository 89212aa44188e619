//! Contract template detection
//!
//! A template is a script declared as `@contract def name(p: T = d, ...) = body`.
//! This is the one place templates are recognised; the compiler and the
//! import expander both ask here.

use serde::{Deserialize, Serialize};

use super::tokenizer::{tokenize_lenient, Token};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractTemplate {
    pub name: String,
    /// 1-based line of the `@contract` annotation
    pub line: usize,
    pub params: Vec<String>,
}

/// Find the first `@contract def` declaration in `source`.
pub fn detect_contract_template(source: &str) -> Option<ContractTemplate> {
    let tokens = tokenize_lenient(source);
    let start = tokens.windows(4).position(|w| {
        w[0].token == Token::At
            && w[1].token == Token::Identifier("contract".to_string())
            && w[2].token == Token::Def
            && matches!(w[3].token, Token::Identifier(_))
    })?;

    let name = match &tokens[start + 3].token {
        Token::Identifier(name) => name.clone(),
        _ => return None,
    };

    // parameter names are the identifiers directly followed by ':' or '='
    // at parenthesis depth one
    let mut params = Vec::new();
    let mut depth = 0usize;
    let mut i = start + 4;
    while i < tokens.len() {
        match &tokens[i].token {
            Token::LParen => depth += 1,
            Token::RParen => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    break;
                }
            }
            Token::Identifier(p)
                if depth == 1
                    && matches!(
                        tokens.get(i + 1).map(|t| &t.token),
                        Some(Token::Colon) | Some(Token::Assign)
                    )
                    && matches!(
                        tokens.get(i.wrapping_sub(1)).map(|t| &t.token),
                        Some(Token::LParen) | Some(Token::Comma)
                    ) =>
            {
                params.push(p.clone());
            }
            Token::Eof => break,
            _ => {}
        }
        if depth == 0 {
            break;
        }
        i += 1;
    }

    Some(ContractTemplate {
        name,
        line: tokens[start].span.line,
        params,
    })
}

pub fn is_contract_template(source: &str) -> bool {
    detect_contract_template(source).is_some()
}
