//! Boolean expression tree the search compiler lowers filter groups into.

/// Folds an iterator of fallibly built leaves into one expression.
pub trait ExpandNode: Iterator {
    fn expand<U, E>(
        self,
        cb: impl FnMut(<Self as Iterator>::Item) -> Result<Expr<U>, E>,
        fold: impl Fn(Expr<U>, Expr<U>) -> Expr<U>,
    ) -> Result<Option<Expr<U>>, E>;
}

impl<I> ExpandNode for I
where
    I: Iterator,
{
    fn expand<U, E>(
        mut self,
        mut cb: impl FnMut(<Self as Iterator>::Item) -> Result<Expr<U>, E>,
        fold: impl Fn(Expr<U>, Expr<U>) -> Expr<U>,
    ) -> Result<Option<Expr<U>>, E> {
        self.try_fold(None, |acc, cur| {
            let node = cb(cur)?;
            Ok(Some(match acc {
                Some(acc) => fold(acc, node),
                None => node,
            }))
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr<B> {
    And(Box<Expr<B>>, Box<Expr<B>>),
    Or(Box<Expr<B>>, Box<Expr<B>>),
    Not(Box<Expr<B>>),
    Literal(B),
}

impl<B> Expr<B> {
    pub fn and(a: Self, b: Self) -> Self {
        Expr::And(Box::new(a), Box::new(b))
    }

    pub fn or(a: Self, b: Self) -> Self {
        Expr::Or(Box::new(a), Box::new(b))
    }

    pub fn is_not(a: Self) -> Self {
        Expr::Not(Box::new(a))
    }

    pub fn val(v: B) -> Self {
        Expr::Literal(v)
    }

    /// Writes the expression as SQL, leaves rendered by `leaf` in
    /// left-to-right order so positional parameters line up.
    pub fn render<E>(
        &self,
        out: &mut String,
        leaf: &mut impl FnMut(&B, &mut String) -> Result<(), E>,
    ) -> Result<(), E> {
        match self {
            Expr::And(a, b) | Expr::Or(a, b) => {
                let joiner = if matches!(self, Expr::And(..)) {
                    " AND "
                } else {
                    " OR "
                };
                out.push('(');
                a.render(out, leaf)?;
                out.push_str(joiner);
                b.render(out, leaf)?;
                out.push(')');
            }
            Expr::Not(a) => {
                out.push_str("NOT ");
                a.render(out, leaf)?;
            }
            Expr::Literal(v) => leaf(v, out)?,
        }
        Ok(())
    }
}
