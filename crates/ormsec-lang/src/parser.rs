//! Recursive descent parser for queries and access rules.

use crate::ast::*;
use crate::error::ParseError;
use crate::lexer::{tokenize, Keyword, SpannedToken, Token};
use crate::span::Span;

/// Parser for the query language and the access rule superset.
pub struct Parser<'source> {
    source: &'source str,
    tokens: Vec<SpannedToken>,
    pos: usize,
    last_span: Span,
}

impl<'source> Parser<'source> {
    /// Create a new parser for the given source.
    pub fn new(source: &'source str) -> Result<Self, ParseError> {
        Ok(Self {
            source,
            tokens: tokenize(source)?,
            pos: 0,
            last_span: Span::default(),
        })
    }

    /// Parse a complete statement: SELECT, UPDATE, DELETE or GRANT.
    pub fn parse_statement(&mut self) -> Result<Node, ParseError> {
        let statement = match self.peek_keyword() {
            Some(Keyword::Select) => self.parse_select_statement()?,
            Some(Keyword::Update) => self.parse_update_statement()?,
            Some(Keyword::Delete) => self.parse_delete_statement()?,
            Some(Keyword::Grant) => self.parse_access_rule()?,
            _ => return Err(self.error_here("SELECT, UPDATE, DELETE or GRANT")),
        };
        self.expect_end()?;
        Ok(statement)
    }

    /// Parse an access rule and nothing else.
    pub fn parse_rule(&mut self) -> Result<Node, ParseError> {
        if self.peek_keyword() != Some(Keyword::Grant) {
            return Err(self.error_here("GRANT"));
        }
        let rule = self.parse_access_rule()?;
        self.expect_end()?;
        Ok(rule)
    }

    fn parse_select_statement(&mut self) -> Result<Node, ParseError> {
        let start = self.current_span();
        let mut children = vec![self.parse_select_clause()?, self.parse_from_clause()?];
        if let Some(clause) = self.parse_where_clause()? {
            children.push(clause);
        }
        if let Some(clause) = self.parse_group_by_clause()? {
            children.push(clause);
        }
        if let Some(clause) = self.parse_having_clause()? {
            children.push(clause);
        }
        if let Some(clause) = self.parse_order_by_clause()? {
            children.push(clause);
        }
        Ok(self.finish(NodeKind::SelectStatement, children, start))
    }

    fn parse_update_statement(&mut self) -> Result<Node, ParseError> {
        let start = self.current_span();
        self.expect_keyword(Keyword::Update)?;
        let entity = self.parse_abstract_schema_name()?;
        let alias = self.parse_declared_alias()?;
        let update = self.finish(NodeKind::UpdateClause, vec![entity, alias], start);

        let set_start = self.expect_keyword(Keyword::Set)?;
        let mut assignments = Vec::new();
        loop {
            let assignment_start = self.current_span();
            let target = self.parse_path_expression()?;
            self.expect(Token::Eq, "'='")?;
            let value = self.parse_additive()?;
            assignments.push(self.finish(
                NodeKind::Assignment,
                vec![target, value],
                assignment_start,
            ));
            if !self.eat(&Token::Comma) {
                break;
            }
        }
        let set = self.finish(NodeKind::SetClause, assignments, set_start);

        let mut children = vec![update, set];
        if let Some(clause) = self.parse_where_clause()? {
            children.push(clause);
        }
        Ok(self.finish(NodeKind::UpdateStatement, children, start))
    }

    fn parse_delete_statement(&mut self) -> Result<Node, ParseError> {
        let start = self.current_span();
        self.expect_keyword(Keyword::Delete)?;
        self.expect_keyword(Keyword::From)?;
        let entity = self.parse_abstract_schema_name()?;
        let alias = self.parse_declared_alias()?;
        let delete = self.finish(NodeKind::DeleteClause, vec![entity, alias], start);

        let mut children = vec![delete];
        if let Some(clause) = self.parse_where_clause()? {
            children.push(clause);
        }
        Ok(self.finish(NodeKind::DeleteStatement, children, start))
    }

    /// `GRANT [CREATE|READ|UPDATE|DELETE]* ACCESS TO <Type> <alias> [WHERE ...]`
    fn parse_access_rule(&mut self) -> Result<Node, ParseError> {
        let start = self.expect_keyword(Keyword::Grant)?;

        let mut kinds = Vec::new();
        loop {
            let kind = match self.peek_keyword() {
                Some(Keyword::Create) => AccessKind::Create,
                Some(Keyword::Read) => AccessKind::Read,
                Some(Keyword::Update) => AccessKind::Update,
                Some(Keyword::Delete) => AccessKind::Delete,
                _ => break,
            };
            self.advance();
            if !kinds.contains(&kind) {
                kinds.push(kind);
            }
        }

        self.expect_keyword(Keyword::Access)?;
        self.expect_keyword(Keyword::To)?;
        let entity = self.parse_abstract_schema_name()?;
        let alias = self.parse_declared_alias()?;

        let mut children = vec![entity, alias];
        if let Some(clause) = self.parse_where_clause()? {
            children.push(clause);
        }
        Ok(self.finish(NodeKind::AccessRule { kinds }, children, start))
    }

    fn parse_select_clause(&mut self) -> Result<Node, ParseError> {
        let start = self.expect_keyword(Keyword::Select)?;
        let distinct = self.eat_keyword(Keyword::Distinct);
        let mut items = vec![self.parse_select_expression()?];
        while self.eat(&Token::Comma) {
            items.push(self.parse_select_expression()?);
        }
        Ok(self.finish(NodeKind::SelectClause { distinct }, items, start))
    }

    fn parse_select_expression(&mut self) -> Result<Node, ParseError> {
        if self.peek_keyword() != Some(Keyword::New) {
            return self.parse_additive();
        }

        let start = self.expect_keyword(Keyword::New)?;
        let mut type_name = self.expect_word("a constructor class name")?;
        while self.eat(&Token::Dot) {
            type_name.push('.');
            type_name.push_str(&self.expect_word("a class name segment")?);
        }
        self.expect(Token::LParen, "'('")?;
        let mut args = vec![self.parse_additive()?];
        while self.eat(&Token::Comma) {
            args.push(self.parse_additive()?);
        }
        self.expect(Token::RParen, "')'")?;
        Ok(self.finish(NodeKind::Constructor(type_name), args, start))
    }

    fn parse_from_clause(&mut self) -> Result<Node, ParseError> {
        let start = self.expect_keyword(Keyword::From)?;
        let mut items = vec![self.parse_from_item()?];
        while self.eat(&Token::Comma) {
            items.push(self.parse_from_item()?);
        }
        Ok(self.finish(NodeKind::FromClause, items, start))
    }

    fn parse_from_item(&mut self) -> Result<Node, ParseError> {
        let start = self.current_span();
        let entity = self.parse_abstract_schema_name()?;
        let alias = self.parse_declared_alias()?;
        let mut children = vec![entity, alias];
        while let Some(join) = self.parse_join()? {
            children.push(join);
        }
        Ok(self.finish(NodeKind::FromItem, children, start))
    }

    /// `[INNER] JOIN`, `LEFT [OUTER] JOIN`, each optionally `FETCH`.
    fn parse_join(&mut self) -> Result<Option<Node>, ParseError> {
        let start = self.current_span();
        let outer = match self.peek_keyword() {
            Some(Keyword::Join) => false,
            Some(Keyword::Inner) => {
                self.advance();
                false
            }
            Some(Keyword::Left) => {
                self.advance();
                self.eat_keyword(Keyword::Outer);
                true
            }
            _ => return Ok(None),
        };
        self.expect_keyword(Keyword::Join)?;
        let fetch = self.eat_keyword(Keyword::Fetch);

        let mut children = vec![self.parse_path_expression()?];
        let has_alias = self.eat_keyword(Keyword::As) || self.peek_is_alias();
        if has_alias {
            children.push(self.parse_identification_variable()?);
        }

        let kind = if outer {
            NodeKind::OuterJoin { fetch }
        } else {
            NodeKind::InnerJoin { fetch }
        };
        Ok(Some(self.finish(kind, children, start)))
    }

    fn parse_where_clause(&mut self) -> Result<Option<Node>, ParseError> {
        let start = self.current_span();
        if !self.eat_keyword(Keyword::Where) {
            return Ok(None);
        }
        let condition = self.parse_conditional_expression()?;
        Ok(Some(self.finish(NodeKind::WhereClause, vec![condition], start)))
    }

    fn parse_group_by_clause(&mut self) -> Result<Option<Node>, ParseError> {
        let start = self.current_span();
        if !self.eat_keyword(Keyword::Group) {
            return Ok(None);
        }
        self.expect_keyword(Keyword::By)?;
        let mut items = vec![self.parse_additive()?];
        while self.eat(&Token::Comma) {
            items.push(self.parse_additive()?);
        }
        Ok(Some(self.finish(NodeKind::GroupByClause, items, start)))
    }

    fn parse_having_clause(&mut self) -> Result<Option<Node>, ParseError> {
        let start = self.current_span();
        if !self.eat_keyword(Keyword::Having) {
            return Ok(None);
        }
        let condition = self.parse_conditional_expression()?;
        Ok(Some(self.finish(NodeKind::HavingClause, vec![condition], start)))
    }

    fn parse_order_by_clause(&mut self) -> Result<Option<Node>, ParseError> {
        let start = self.current_span();
        if !self.eat_keyword(Keyword::Order) {
            return Ok(None);
        }
        self.expect_keyword(Keyword::By)?;
        let mut items = Vec::new();
        loop {
            let item_start = self.current_span();
            let expression = self.parse_additive()?;
            let descending = if self.eat_keyword(Keyword::Desc) {
                true
            } else {
                self.eat_keyword(Keyword::Asc);
                false
            };
            items.push(self.finish(
                NodeKind::OrderByItem { descending },
                vec![expression],
                item_start,
            ));
            if !self.eat(&Token::Comma) {
                break;
            }
        }
        Ok(Some(self.finish(NodeKind::OrderByClause, items, start)))
    }

    /// Parse a subselect after its opening parenthesis has been consumed.
    fn parse_subselect(&mut self, start: Span) -> Result<Node, ParseError> {
        let mut children = vec![self.parse_select_clause()?, self.parse_from_clause()?];
        if let Some(clause) = self.parse_where_clause()? {
            children.push(clause);
        }
        if let Some(clause) = self.parse_group_by_clause()? {
            children.push(clause);
        }
        if let Some(clause) = self.parse_having_clause()? {
            children.push(clause);
        }
        self.expect(Token::RParen, "')'")?;
        Ok(self.finish(NodeKind::Subselect, children, start))
    }

    // ---- Conditions ----

    /// Parse OR conditions.
    fn parse_conditional_expression(&mut self) -> Result<Node, ParseError> {
        let start = self.current_span();
        let mut terms = vec![self.parse_conditional_term()?];
        while self.eat_keyword(Keyword::Or) {
            terms.push(self.parse_conditional_term()?);
        }
        Ok(self.collapse(NodeKind::Or, terms, start))
    }

    /// Parse AND conditions.
    fn parse_conditional_term(&mut self) -> Result<Node, ParseError> {
        let start = self.current_span();
        let mut factors = vec![self.parse_conditional_factor()?];
        while self.eat_keyword(Keyword::And) {
            factors.push(self.parse_conditional_factor()?);
        }
        Ok(self.collapse(NodeKind::And, factors, start))
    }

    fn parse_conditional_factor(&mut self) -> Result<Node, ParseError> {
        let start = self.current_span();
        if self.eat_keyword(Keyword::Not) {
            let operand = self.parse_conditional_factor()?;
            return Ok(self.finish(NodeKind::Not, vec![operand], start));
        }
        self.parse_condition()
    }

    fn parse_condition(&mut self) -> Result<Node, ParseError> {
        let start = self.current_span();

        if self.eat_keyword(Keyword::Exists) {
            let subselect_start = self.expect(Token::LParen, "'('")?;
            if self.peek_keyword() != Some(Keyword::Select) {
                return Err(self.error_here("SELECT"));
            }
            let subselect = self.parse_subselect(subselect_start)?;
            return Ok(self.finish(NodeKind::Exists, vec![subselect], start));
        }

        let left = self.parse_additive()?;

        if let Some(kind) = self.peek_comparison() {
            self.advance();
            let right = self.parse_additive()?;
            return Ok(self.finish(kind, vec![left, right], start));
        }

        let negated = self.peek_keyword() == Some(Keyword::Not)
            && matches!(
                self.peek_keyword_at(1),
                Some(Keyword::Between | Keyword::In | Keyword::Like | Keyword::Member)
            );
        if negated {
            self.advance();
        }

        let condition = match self.peek_keyword() {
            Some(Keyword::Between) => {
                self.advance();
                let lower = self.parse_additive()?;
                self.expect_keyword(Keyword::And)?;
                let upper = self.parse_additive()?;
                self.finish(NodeKind::Between, vec![left, lower, upper], start)
            }
            Some(Keyword::In) => {
                self.advance();
                let mut children = vec![left];
                children.extend(self.parse_in_items()?);
                self.finish(NodeKind::In, children, start)
            }
            Some(Keyword::Like) => {
                self.advance();
                let pattern = self.parse_additive()?;
                let mut children = vec![left, pattern];
                if self.eat_keyword(Keyword::Escape) {
                    children.push(self.parse_primary()?);
                }
                self.finish(NodeKind::Like, children, start)
            }
            Some(Keyword::Member) => {
                self.advance();
                self.eat_keyword(Keyword::Of);
                let collection = self.parse_primary()?;
                self.finish(NodeKind::MemberOf, vec![left, collection], start)
            }
            Some(Keyword::Is) if !negated => {
                self.advance();
                let is_not = self.eat_keyword(Keyword::Not);
                let kind = if self.eat_keyword(Keyword::Null) {
                    NodeKind::IsNull
                } else if self.eat_keyword(Keyword::Empty) {
                    NodeKind::IsEmpty
                } else {
                    return Err(self.error_here("NULL or EMPTY"));
                };
                let test = self.finish(kind, vec![left], start);
                if is_not {
                    self.finish(NodeKind::Not, vec![test], start)
                } else {
                    test
                }
            }
            _ => return Ok(left),
        };

        if negated {
            Ok(self.finish(NodeKind::Not, vec![condition], start))
        } else {
            Ok(condition)
        }
    }

    fn parse_in_items(&mut self) -> Result<Vec<Node>, ParseError> {
        if matches!(
            self.peek_token(),
            Some(Token::NamedParameter(_) | Token::PositionalParameter(_))
        ) {
            return Ok(vec![self.parse_primary()?]);
        }

        let start = self.expect(Token::LParen, "'('")?;
        if self.peek_keyword() == Some(Keyword::Select) {
            return Ok(vec![self.parse_subselect(start)?]);
        }

        let mut items = vec![self.parse_additive()?];
        while self.eat(&Token::Comma) {
            items.push(self.parse_additive()?);
        }
        self.expect(Token::RParen, "')'")?;
        Ok(items)
    }

    fn peek_comparison(&self) -> Option<NodeKind> {
        match self.peek_token()? {
            Token::Eq => Some(NodeKind::Equals),
            Token::Ne => Some(NodeKind::NotEquals),
            Token::Lt => Some(NodeKind::LessThan),
            Token::Le => Some(NodeKind::LessOrEqual),
            Token::Gt => Some(NodeKind::GreaterThan),
            Token::Ge => Some(NodeKind::GreaterOrEqual),
            _ => None,
        }
    }

    // ---- Scalar expressions ----

    fn parse_additive(&mut self) -> Result<Node, ParseError> {
        let start = self.current_span();
        let mut left = self.parse_multiplicative()?;
        loop {
            let kind = match self.peek_token() {
                Some(Token::Plus) => NodeKind::Add,
                Some(Token::Minus) => NodeKind::Subtract,
                _ => break,
            };
            self.advance();
            let right = self.parse_multiplicative()?;
            left = self.finish(kind, vec![left, right], start);
        }
        Ok(left)
    }

    fn parse_multiplicative(&mut self) -> Result<Node, ParseError> {
        let start = self.current_span();
        let mut left = self.parse_unary()?;
        loop {
            let kind = match self.peek_token() {
                Some(Token::Star) => NodeKind::Multiply,
                Some(Token::Slash) => NodeKind::Divide,
                _ => break,
            };
            self.advance();
            let right = self.parse_unary()?;
            left = self.finish(kind, vec![left, right], start);
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Node, ParseError> {
        let start = self.current_span();
        if self.eat(&Token::Minus) {
            let operand = self.parse_unary()?;
            return Ok(self.finish(NodeKind::Negative, vec![operand], start));
        }
        if self.eat(&Token::Plus) {
            return self.parse_unary();
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Node, ParseError> {
        let Some(spanned) = self.tokens.get(self.pos).cloned() else {
            return Err(self.error_here("an expression"));
        };
        let span = spanned.span;

        let kind = match spanned.token {
            Token::LParen => {
                self.advance();
                if self.peek_keyword() == Some(Keyword::Select) {
                    return self.parse_subselect(span);
                }
                let inner = self.parse_conditional_expression()?;
                self.expect(Token::RParen, "')'")?;
                return Ok(self.finish(NodeKind::Brackets, vec![inner], span));
            }
            Token::String(raw) => NodeKind::StringLiteral(raw),
            Token::Integer(text) => NodeKind::IntegerLiteral(text),
            Token::Decimal(text) => NodeKind::DecimalLiteral(text),
            Token::NamedParameter(name) => NodeKind::NamedParameter(name),
            Token::PositionalParameter(index) => NodeKind::PositionalParameter(index),
            Token::Word(ref word) => {
                if self.peek_token_at(1) == Some(&Token::LParen) {
                    if let Some(function) = self.parse_function(word)? {
                        return Ok(function);
                    }
                }
                match Keyword::from_word(word) {
                    Some(Keyword::True) => NodeKind::BooleanLiteral(true),
                    Some(Keyword::False) => NodeKind::BooleanLiteral(false),
                    Some(Keyword::Null) => NodeKind::Null,
                    Some(Keyword::CurrentDate) => NodeKind::CurrentDate,
                    Some(Keyword::CurrentTime) => NodeKind::CurrentTime,
                    Some(Keyword::CurrentTimestamp) => NodeKind::CurrentTimestamp,
                    Some(Keyword::CurrentPrincipal) => NodeKind::CurrentPrincipal,
                    Some(Keyword::CurrentRoles) => NodeKind::CurrentRoles,
                    Some(Keyword::CurrentTenant) => NodeKind::CurrentTenant,
                    Some(keyword) if keyword.is_reserved() => {
                        return Err(self.error_here("an expression"));
                    }
                    _ => return self.parse_path_expression(),
                }
            }
            _ => return Err(self.error_here("an expression")),
        };

        self.advance();
        Ok(Node::leaf(kind, span))
    }

    /// Parse a function call whose name is the current word, or `None` if
    /// the word names no function.
    fn parse_function(&mut self, name: &str) -> Result<Option<Node>, ParseError> {
        let start = self.current_span();

        if let Some(function) = AggregateFunction::from_name(name) {
            self.advance();
            self.expect(Token::LParen, "'('")?;
            let distinct = self.eat_keyword(Keyword::Distinct);
            let argument = self.parse_additive()?;
            self.expect(Token::RParen, "')'")?;
            return Ok(Some(self.finish(
                NodeKind::Aggregate { function, distinct },
                vec![argument],
                start,
            )));
        }

        let upper = name.to_ascii_uppercase();
        let (kind, min_args, max_args) = match upper.as_str() {
            "CONCAT" => (NodeKind::Concat, 2, usize::MAX),
            "SUBSTRING" => (NodeKind::Substring, 2, 3),
            "LOCATE" => (NodeKind::Locate, 2, 3),
            "MOD" => (NodeKind::Mod, 2, 2),
            "UPPER" => (NodeKind::Upper, 1, 1),
            "LOWER" => (NodeKind::Lower, 1, 1),
            "LENGTH" => (NodeKind::Length, 1, 1),
            "ABS" => (NodeKind::Abs, 1, 1),
            "SQRT" => (NodeKind::Sqrt, 1, 1),
            "SIZE" => (NodeKind::Size, 1, 1),
            "TRIM" => {
                self.advance();
                return self.parse_trim(start).map(Some);
            }
            _ => return Ok(None),
        };

        self.advance();
        self.expect(Token::LParen, "'('")?;
        let mut args = vec![self.parse_additive()?];
        while self.eat(&Token::Comma) {
            args.push(self.parse_additive()?);
        }
        if args.len() < min_args || args.len() > max_args {
            let expected = if min_args == max_args {
                format!("{} argument(s) to {}", min_args, upper)
            } else {
                format!("at least {} arguments to {}", min_args, upper)
            };
            return Err(ParseError::at(
                self.source,
                start.merge(self.last_span),
                expected,
                format!("{}", args.len()),
            ));
        }
        self.expect(Token::RParen, "')'")?;
        Ok(Some(self.finish(kind, args, start)))
    }

    /// `TRIM([[LEADING|TRAILING|BOTH] [char] FROM] text)`
    fn parse_trim(&mut self, start: Span) -> Result<Node, ParseError> {
        self.expect(Token::LParen, "'('")?;

        let spec = match self.peek_keyword() {
            Some(Keyword::Leading) => Some(TrimSpec::Leading),
            Some(Keyword::Trailing) => Some(TrimSpec::Trailing),
            Some(Keyword::Both) => Some(TrimSpec::Both),
            _ => None,
        };
        if spec.is_some() {
            self.advance();
        }

        let mut children = Vec::new();
        if self.eat_keyword(Keyword::From) {
            children.push(self.parse_additive()?);
        } else {
            let first = self.parse_additive()?;
            if self.eat_keyword(Keyword::From) {
                children.push(first);
                children.push(self.parse_additive()?);
            } else if spec.is_some() {
                return Err(self.error_here("FROM"));
            } else {
                children.push(first);
            }
        }

        self.expect(Token::RParen, "')'")?;
        Ok(self.finish(NodeKind::Trim { spec }, children, start))
    }

    /// An identification variable optionally followed by `.segment`s.
    fn parse_path_expression(&mut self) -> Result<Node, ParseError> {
        let start = self.current_span();
        let root = self.parse_identification_variable()?;
        let mut children = vec![root];
        while self.eat(&Token::Dot) {
            let span = self.current_span();
            let segment = self.expect_word("a property name")?;
            children.push(Node::leaf(NodeKind::PathSegment(segment), span));
        }
        if children.len() == 1 {
            return Ok(children.remove(0));
        }
        Ok(self.finish(NodeKind::Path, children, start))
    }

    fn parse_abstract_schema_name(&mut self) -> Result<Node, ParseError> {
        let span = self.current_span();
        let name = self.expect_word("an entity name")?;
        Ok(Node::leaf(NodeKind::AbstractSchemaName(name), span))
    }

    /// `[AS] alias`
    fn parse_declared_alias(&mut self) -> Result<Node, ParseError> {
        self.eat_keyword(Keyword::As);
        self.parse_identification_variable()
    }

    fn parse_identification_variable(&mut self) -> Result<Node, ParseError> {
        if !self.peek_is_alias() {
            return Err(self.error_here("an identification variable"));
        }
        let span = self.current_span();
        let name = self.expect_word("an identification variable")?;
        Ok(Node::leaf(NodeKind::Identifier(name), span))
    }

    fn peek_is_alias(&self) -> bool {
        match self.peek_token() {
            Some(token @ Token::Word(_)) => !token.keyword().is_some_and(|k| k.is_reserved()),
            _ => false,
        }
    }

    // ---- Token helpers ----

    fn peek_token(&self) -> Option<&Token> {
        self.peek_token_at(0)
    }

    fn peek_token_at(&self, offset: usize) -> Option<&Token> {
        self.tokens.get(self.pos + offset).map(|t| &t.token)
    }

    fn peek_keyword(&self) -> Option<Keyword> {
        self.peek_keyword_at(0)
    }

    fn peek_keyword_at(&self, offset: usize) -> Option<Keyword> {
        self.peek_token_at(offset).and_then(Token::keyword)
    }

    fn current_span(&self) -> Span {
        self.tokens
            .get(self.pos)
            .map(|t| t.span)
            .unwrap_or_else(|| Span::eof(self.source))
    }

    fn advance(&mut self) {
        if let Some(token) = self.tokens.get(self.pos) {
            self.last_span = token.span;
            self.pos += 1;
        }
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek_token() == Some(token) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn eat_keyword(&mut self, keyword: Keyword) -> bool {
        if self.peek_keyword() == Some(keyword) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: Token, expected: &str) -> Result<Span, ParseError> {
        if self.peek_token() == Some(&token) {
            self.advance();
            Ok(self.last_span)
        } else {
            Err(self.error_here(expected))
        }
    }

    fn expect_keyword(&mut self, keyword: Keyword) -> Result<Span, ParseError> {
        if self.eat_keyword(keyword) {
            Ok(self.last_span)
        } else {
            Err(self.error_here(keyword.as_str()))
        }
    }

    fn expect_word(&mut self, expected: &str) -> Result<String, ParseError> {
        match self.peek_token() {
            Some(Token::Word(word)) => {
                let word = word.clone();
                self.advance();
                Ok(word)
            }
            _ => Err(self.error_here(expected)),
        }
    }

    fn expect_end(&self) -> Result<(), ParseError> {
        if self.pos < self.tokens.len() {
            return Err(self.error_here("end of input"));
        }
        Ok(())
    }

    fn error_here(&self, expected: &str) -> ParseError {
        match self.tokens.get(self.pos) {
            Some(t) => ParseError::at(self.source, t.span, expected, t.token.describe()),
            None => ParseError::at(self.source, Span::eof(self.source), expected, "end of input"),
        }
    }

    fn finish(&self, kind: NodeKind, children: Vec<Node>, start: Span) -> Node {
        Node::new(kind, children, start.merge(self.last_span))
    }

    fn collapse(&self, kind: NodeKind, mut operands: Vec<Node>, start: Span) -> Node {
        if operands.len() == 1 {
            operands.remove(0)
        } else {
            self.finish(kind, operands, start)
        }
    }
}

/// Parse a source string into a statement or access rule tree.
pub fn parse(source: &str) -> Result<Node, ParseError> {
    Parser::new(source)?.parse_statement()
}

/// Parse a source string that must be a single access rule.
pub fn parse_rule(source: &str) -> Result<Node, ParseError> {
    Parser::new(source)?.parse_rule()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn where_condition(statement: &Node) -> &Node {
        let clause = statement
            .find_child(|k| *k == NodeKind::WhereClause)
            .unwrap();
        &clause.children[0]
    }

    #[test]
    fn test_parse_simple_select() {
        let stmt = parse("SELECT d FROM Document d").unwrap();
        assert_eq!(stmt.kind, NodeKind::SelectStatement);
        assert_eq!(stmt.children.len(), 2);

        let select = &stmt.children[0];
        assert_eq!(select.kind, NodeKind::SelectClause { distinct: false });
        assert_eq!(select.children[0], Node::identifier("d"));

        let item = &stmt.children[1].children[0];
        assert_eq!(item.kind, NodeKind::FromItem);
        assert_eq!(
            item.children[0].kind,
            NodeKind::AbstractSchemaName("Document".into())
        );
        assert_eq!(item.children[1], Node::identifier("d"));
    }

    #[test]
    fn test_parse_access_rule() {
        let rule = parse(
            "GRANT READ ACCESS TO ClientDetails cd WHERE cd.owner = CURRENT_PRINCIPAL",
        )
        .unwrap();
        assert_eq!(
            rule.kind,
            NodeKind::AccessRule {
                kinds: vec![AccessKind::Read]
            }
        );
        let condition = where_condition(&rule);
        assert_eq!(condition.kind, NodeKind::Equals);
        assert_eq!(condition.children[0], Node::path_from_str("cd.owner"));
        assert_eq!(condition.children[1].kind, NodeKind::CurrentPrincipal);
    }

    #[test]
    fn test_parse_rule_kinds() {
        let rule = parse_rule("GRANT UPDATE DELETE UPDATE ACCESS TO Document d").unwrap();
        assert_eq!(
            rule.kind,
            NodeKind::AccessRule {
                kinds: vec![AccessKind::Update, AccessKind::Delete]
            }
        );

        let all = parse_rule("GRANT ACCESS TO Document d").unwrap();
        assert_eq!(all.kind, NodeKind::AccessRule { kinds: vec![] });
        assert!(parse_rule("SELECT d FROM Document d").is_err());
    }

    #[test]
    fn test_operator_precedence() {
        let stmt = parse("SELECT d FROM Document d WHERE d.a = 1 OR d.b = 2 AND NOT d.c = 3").unwrap();
        let condition = where_condition(&stmt);
        assert_eq!(condition.kind, NodeKind::Or);
        assert_eq!(condition.children[1].kind, NodeKind::And);
        assert_eq!(condition.children[1].children[1].kind, NodeKind::Not);

        let stmt = parse("SELECT d FROM Document d WHERE d.a + 2 * 3 > 4").unwrap();
        let comparison = where_condition(&stmt);
        assert_eq!(comparison.kind, NodeKind::GreaterThan);
        assert_eq!(comparison.children[0].kind, NodeKind::Add);
        assert_eq!(comparison.children[0].children[1].kind, NodeKind::Multiply);
    }

    #[test]
    fn test_nary_and() {
        let stmt = parse("SELECT d FROM Document d WHERE d.a = 1 AND d.b = 2 AND d.c = 3").unwrap();
        let condition = where_condition(&stmt);
        assert_eq!(condition.kind, NodeKind::And);
        assert_eq!(condition.children.len(), 3);
    }

    #[test]
    fn test_negated_conditions() {
        let stmt = parse(
            "SELECT d FROM Document d WHERE d.a NOT BETWEEN 1 AND 2 AND d.b NOT IN ('x', 'y') \
             AND d.c NOT LIKE 'a%' AND d.d IS NOT NULL AND d.e IS NOT EMPTY AND d NOT MEMBER OF d.f",
        )
        .unwrap();
        let condition = where_condition(&stmt);
        let inner: Vec<&NodeKind> = condition
            .children
            .iter()
            .map(|c| {
                assert_eq!(c.kind, NodeKind::Not);
                &c.children[0].kind
            })
            .collect();
        assert_eq!(
            inner,
            vec![
                &NodeKind::Between,
                &NodeKind::In,
                &NodeKind::Like,
                &NodeKind::IsNull,
                &NodeKind::IsEmpty,
                &NodeKind::MemberOf,
            ]
        );
    }

    #[test]
    fn test_like_with_escape() {
        let stmt = parse(r"SELECT d FROM Document d WHERE d.name LIKE 'a!_%' ESCAPE '!'").unwrap();
        let like = where_condition(&stmt);
        assert_eq!(like.kind, NodeKind::Like);
        assert_eq!(like.children.len(), 3);
        assert_eq!(like.children[2].string_value().as_deref(), Some("!"));
    }

    #[test]
    fn test_exists_subselect() {
        let rule = parse_rule(
            "GRANT READ ACCESS TO ClientDetails cd WHERE EXISTS \
             (SELECT s FROM Staffing s WHERE s.client = cd.client AND s.employee.name = CURRENT_PRINCIPAL)",
        )
        .unwrap();
        let exists = where_condition(&rule);
        assert_eq!(exists.kind, NodeKind::Exists);
        let subselect = &exists.children[0];
        assert_eq!(subselect.kind, NodeKind::Subselect);
        assert_eq!(subselect.children.len(), 3);
    }

    #[test]
    fn test_in_forms() {
        let stmt = parse("SELECT d FROM Document d WHERE d.owner IN (SELECT u.name FROM User u)").unwrap();
        let in_node = where_condition(&stmt);
        assert_eq!(in_node.children[1].kind, NodeKind::Subselect);

        let stmt = parse("SELECT d FROM Document d WHERE d.owner IN :owners").unwrap();
        let in_node = where_condition(&stmt);
        assert_eq!(in_node.children[1], Node::named_parameter("owners"));
    }

    #[test]
    fn test_joins() {
        let stmt = parse(
            "SELECT c FROM Client c INNER JOIN c.staffings s LEFT OUTER JOIN FETCH c.details JOIN c.parent AS p",
        )
        .unwrap();
        let item = &stmt.children[1].children[0];
        assert_eq!(item.children.len(), 5);
        assert_eq!(item.children[2].kind, NodeKind::InnerJoin { fetch: false });
        assert_eq!(item.children[2].children[1], Node::identifier("s"));
        assert_eq!(item.children[3].kind, NodeKind::OuterJoin { fetch: true });
        assert_eq!(item.children[3].children.len(), 1);
        assert_eq!(item.children[4].children[1], Node::identifier("p"));
    }

    #[test]
    fn test_functions() {
        let stmt = parse(
            "SELECT d FROM Document d WHERE TRIM(LEADING 'x' FROM d.name) = SUBSTRING(d.title, 1, 3) \
             AND LOCATE('a', d.name) > 0 AND MOD(d.size, 2) = 1 AND CONCAT(d.a, d.b, d.c) = 'abc' \
             AND TRIM(d.name) = UPPER(d.title)",
        )
        .unwrap();
        let condition = where_condition(&stmt);
        let trim = &condition.children[0].children[0];
        assert_eq!(
            trim.kind,
            NodeKind::Trim {
                spec: Some(TrimSpec::Leading)
            }
        );
        assert_eq!(trim.children.len(), 2);
        assert_eq!(condition.children[3].children[0].children.len(), 3);
        let plain_trim = &condition.children[4].children[0];
        assert_eq!(plain_trim.kind, NodeKind::Trim { spec: None });
        assert_eq!(plain_trim.children.len(), 1);
    }

    #[test]
    fn test_constructor_and_aggregates() {
        let stmt = parse(
            "SELECT NEW com.example.Summary(d.owner, COUNT(DISTINCT d)) FROM Document d \
             GROUP BY d.owner HAVING COUNT(d) > 1 ORDER BY d.owner DESC",
        )
        .unwrap();
        let constructor = &stmt.children[0].children[0];
        assert_eq!(
            constructor.kind,
            NodeKind::Constructor("com.example.Summary".into())
        );
        assert_eq!(
            constructor.children[1].kind,
            NodeKind::Aggregate {
                function: AggregateFunction::Count,
                distinct: true
            }
        );
        assert_eq!(stmt.children.len(), 5);
        assert_eq!(
            stmt.children[4].children[0].kind,
            NodeKind::OrderByItem { descending: true }
        );
    }

    #[test]
    fn test_update_and_delete() {
        let stmt = parse("UPDATE Document d SET d.title = 'x', d.size = d.size + 1 WHERE d.id = ?1").unwrap();
        assert_eq!(stmt.kind, NodeKind::UpdateStatement);
        assert_eq!(stmt.children[1].children.len(), 2);
        assert_eq!(stmt.children.len(), 3);

        let stmt = parse("DELETE FROM Document d WHERE d.owner = :owner").unwrap();
        assert_eq!(stmt.kind, NodeKind::DeleteStatement);
        assert_eq!(stmt.children[0].children[1], Node::identifier("d"));
    }

    #[test]
    fn test_keywords_as_property_names() {
        let stmt = parse("SELECT d FROM Document d WHERE d.order.from = 1 AND d.read = TRUE").unwrap();
        let condition = where_condition(&stmt);
        assert_eq!(
            condition.children[0].children[0].path_string().as_deref(),
            Some("d.order.from")
        );
    }

    #[test]
    fn test_contextual_keyword_as_alias() {
        let stmt = parse("SELECT read FROM Document read").unwrap();
        assert_eq!(stmt.children[0].children[0], Node::identifier("read"));
    }

    #[test]
    fn test_error_position() {
        let err = parse("SELECT d FROM Document d\nWHERE d.owner = ").unwrap_err();
        assert_eq!(err.line, 2);
        assert_eq!(err.expected, "an expression");
        assert_eq!(err.found, "end of input");

        let err = parse("SELECT d FROM Document d WHERE d.owner = 'a' 'b'").unwrap_err();
        assert_eq!(err.column, 46);
        assert_eq!(err.expected, "end of input");
        assert_eq!(err.found, "'b'");

        let err = parse("SELECT FROM Document d").unwrap_err();
        assert_eq!(err.column, 8);
        assert_eq!(err.expected, "an expression");
    }

    #[test]
    fn test_wrong_arity() {
        let err = parse("SELECT d FROM Document d WHERE UPPER(d.a, d.b) = 'X'").unwrap_err();
        assert!(err.expected.contains("UPPER"));
    }

    #[test]
    fn test_spans_cover_source() {
        let source = "SELECT d FROM Document d WHERE d.owner = 'alice'";
        let stmt = parse(source).unwrap();
        assert_eq!(stmt.span, Span::new(0, source.len()));
        let condition = where_condition(&stmt);
        assert_eq!(&source[condition.span.start..condition.span.end], "d.owner = 'alice'");
    }
}
