//! Runtime-side representation of R values
//!
//! Both backends speak `RObject`: the reference runtime stores them directly
//! in its symbol table, the process backend decodes them from its frames and
//! renders them back as R source. Marshaling converts between `RObject` and
//! the host-side `Value`.

/// Typed payload of an R object
#[derive(Debug, Clone, PartialEq)]
pub enum RData {
    Null,
    Logical(Vec<bool>),
    Double(Vec<f64>),
    Character(Vec<String>),
    List(Vec<RObject>),
    /// Anything the bridge cannot look inside (functions, environments, NA)
    Opaque(String),
}

/// The attributes the bridge understands; any other attribute makes the
/// object opaque before it reaches the host
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Attributes {
    pub names: Option<Vec<String>>,
    pub dim: Option<Vec<usize>>,
}

impl Attributes {
    pub fn is_empty(&self) -> bool {
        self.names.is_none() && self.dim.is_none()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RObject {
    pub data: RData,
    pub attrs: Attributes,
}

impl RObject {
    pub fn new(data: RData) -> Self {
        Self {
            data,
            attrs: Attributes::default(),
        }
    }

    pub fn null() -> Self {
        Self::new(RData::Null)
    }

    pub fn logical(values: Vec<bool>) -> Self {
        Self::new(RData::Logical(values))
    }

    pub fn double(values: Vec<f64>) -> Self {
        Self::new(RData::Double(values))
    }

    pub fn character(values: Vec<String>) -> Self {
        Self::new(RData::Character(values))
    }

    pub fn list(values: Vec<RObject>, names: Option<Vec<String>>) -> Self {
        Self {
            data: RData::List(values),
            attrs: Attributes { names, dim: None },
        }
    }

    pub fn opaque(class: impl Into<String>) -> Self {
        Self::new(RData::Opaque(class.into()))
    }

    pub fn with_names(mut self, names: Option<Vec<String>>) -> Self {
        self.attrs.names = names;
        self
    }

    pub fn with_dim(mut self, dim: Option<Vec<usize>>) -> Self {
        self.attrs.dim = dim;
        self
    }

    pub fn is_null(&self) -> bool {
        matches!(self.data, RData::Null)
    }

    pub fn len(&self) -> usize {
        match &self.data {
            RData::Null => 0,
            RData::Logical(v) => v.len(),
            RData::Double(v) => v.len(),
            RData::Character(v) => v.len(),
            RData::List(v) => v.len(),
            RData::Opaque(_) => 1,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// R's `typeof()` for the payload
    pub fn type_of(&self) -> &'static str {
        match &self.data {
            RData::Null => "NULL",
            RData::Logical(_) => "logical",
            RData::Double(_) => "double",
            RData::Character(_) => "character",
            RData::List(_) => "list",
            RData::Opaque(_) => "opaque",
        }
    }

    /// A short description of the object's class, used in diagnostics
    pub fn class_name(&self) -> String {
        if let RData::Opaque(class) = &self.data {
            return class.clone();
        }
        if let Some(dim) = &self.attrs.dim {
            return if dim.len() == 2 {
                "matrix".to_string()
            } else {
                "array".to_string()
            };
        }
        match (&self.data, &self.attrs.names) {
            (RData::List(_), Some(_)) => "named list".to_string(),
            (RData::List(_), None) => "list".to_string(),
            (_, Some(_)) => format!("named {}", self.type_of()),
            _ => self.type_of().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_class_names() {
        assert_eq!(RObject::double(vec![1.0]).class_name(), "double");
        assert_eq!(
            RObject::double(vec![1.0, 2.0, 3.0, 4.0])
                .with_dim(Some(vec![2, 2]))
                .class_name(),
            "matrix"
        );
        assert_eq!(
            RObject::logical(vec![true])
                .with_names(Some(vec!["a".into()]))
                .class_name(),
            "named logical"
        );
        assert_eq!(RObject::list(vec![], None).class_name(), "list");
        assert_eq!(RObject::opaque("function").class_name(), "function");
    }

    #[test]
    fn test_lengths() {
        assert_eq!(RObject::null().len(), 0);
        assert!(RObject::character(vec![]).is_empty());
        assert_eq!(RObject::list(vec![RObject::null()], None).len(), 1);
    }
}
