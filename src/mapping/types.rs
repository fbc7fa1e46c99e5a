//! Type descriptions of handler arguments and return values.
//!
//! A handler's signature is the only "reflection" available: every argument
//! type implements [`Parameter`] and describes itself as a [`ParameterType`];
//! the return type implements [`Reply`] and describes itself as a
//! [`ReturnType`]. Factories inspect these descriptions at build time and the
//! conversion functions they carry at request time.

use std::any::{Any, TypeId};
use std::fmt;

use bytes::Bytes;
use serde::Serialize;
use serde::de::DeserializeOwned;
use url::Url;
use uuid::Uuid;

use crate::context::Extensions;
use crate::exchange::{ClientCertificate, Principal};

/// A type-erased argument or return value.
pub type BoxedValue = Box<dyn Any + Send>;

type ParseFn = fn(&str) -> Option<BoxedValue>;
type DecodeFn = fn(&[u8]) -> Result<BoxedValue, String>;
type AbsentFn = fn() -> Option<BoxedValue>;
type ExtractFn = fn(&Extensions) -> Option<BoxedValue>;
type TextFn = fn(&dyn Any) -> Option<String>;
type JsonFn = fn(&dyn Any) -> Option<serde_json::Result<Vec<u8>>>;

/// Broad classification of a parameter's value, used in messages and by
/// factories that only accept certain kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    String,
    Bool,
    Int,
    Long,
    Uuid,
    Url,
    Enum,
    /// A JSON document decoded from the body.
    Json,
    /// Not convertible from a single string (bodies, identities, injected objects).
    Opaque,
}

/// A value that can be parsed out of one request string.
///
/// Implemented for `String`, `bool`, `i32`, `i64`, [`Uuid`] and [`Url`];
/// enums get an implementation from [`enum_parameter!`](crate::enum_parameter).
/// Every implementor is usable as a handler argument, bare or wrapped in `Option`.
pub trait FromParam: Sized + Send + 'static {
    const VALUE_TYPE: ValueType;

    /// Name shown to clients when a value does not convert.
    const TYPE_NAME: &'static str;

    fn from_param(raw: &str) -> Option<Self>;
}

impl FromParam for String {
    const VALUE_TYPE: ValueType = ValueType::String;
    const TYPE_NAME: &'static str = "String";

    fn from_param(raw: &str) -> Option<Self> {
        Some(raw.to_owned())
    }
}

impl FromParam for bool {
    const VALUE_TYPE: ValueType = ValueType::Bool;
    const TYPE_NAME: &'static str = "boolean";

    fn from_param(raw: &str) -> Option<Self> {
        if raw.eq_ignore_ascii_case("true") {
            Some(true)
        } else if raw.eq_ignore_ascii_case("false") {
            Some(false)
        } else {
            None
        }
    }
}

impl FromParam for i32 {
    const VALUE_TYPE: ValueType = ValueType::Int;
    const TYPE_NAME: &'static str = "int";

    fn from_param(raw: &str) -> Option<Self> {
        raw.parse().ok()
    }
}

impl FromParam for i64 {
    const VALUE_TYPE: ValueType = ValueType::Long;
    const TYPE_NAME: &'static str = "long";

    fn from_param(raw: &str) -> Option<Self> {
        raw.parse().ok()
    }
}

impl FromParam for Uuid {
    const VALUE_TYPE: ValueType = ValueType::Uuid;
    const TYPE_NAME: &'static str = "UUID";

    fn from_param(raw: &str) -> Option<Self> {
        Uuid::parse_str(raw).ok()
    }
}

impl FromParam for Url {
    const VALUE_TYPE: ValueType = ValueType::Url;
    const TYPE_NAME: &'static str = "URL";

    fn from_param(raw: &str) -> Option<Self> {
        Url::parse(raw).ok()
    }
}

/// Implements [`FromParam`] for a fieldless enum, matching variants by name.
///
/// ```
/// use actionroute::enum_parameter;
/// use actionroute::mapping::FromParam;
///
/// #[derive(Debug, PartialEq)]
/// enum Sort { Newest, Oldest }
/// enum_parameter!(Sort { Newest, Oldest });
///
/// assert_eq!(Sort::from_param("Oldest"), Some(Sort::Oldest));
/// assert_eq!(Sort::from_param("oldest"), None);
/// ```
#[macro_export]
macro_rules! enum_parameter {
    ($ty:ident { $($variant:ident),+ $(,)? }) => {
        impl $crate::mapping::FromParam for $ty {
            const VALUE_TYPE: $crate::mapping::ValueType = $crate::mapping::ValueType::Enum;
            const TYPE_NAME: &'static str = stringify!($ty);

            fn from_param(raw: &str) -> ::std::option::Option<Self> {
                $(
                    if raw == stringify!($variant) {
                        return ::std::option::Option::Some($ty::$variant);
                    }
                )+
                ::std::option::Option::None
            }
        }
    };
}

/// A JSON-encoded body, decoded or encoded with `serde_json`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Json<T>(pub T);

/// A clone of an object the transport put into the exchange's extensions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Injected<T>(pub T);

/// What a factory may know about one handler argument.
#[derive(Clone)]
pub struct ParameterType {
    type_name: &'static str,
    type_id: TypeId,
    value_type: ValueType,
    optional: bool,
    parse: Option<ParseFn>,
    decode: Option<DecodeFn>,
    absent: AbsentFn,
    extract: Option<ExtractFn>,
}

fn no_value() -> Option<BoxedValue> {
    None
}

fn none_of<T: Send + 'static>() -> Option<BoxedValue> {
    Some(Box::new(None::<T>))
}

fn parse_value<T: FromParam>(raw: &str) -> Option<BoxedValue> {
    T::from_param(raw).map(|v| Box::new(v) as BoxedValue)
}

fn parse_some<T: FromParam>(raw: &str) -> Option<BoxedValue> {
    T::from_param(raw).map(|v| Box::new(Some(v)) as BoxedValue)
}

fn decode_text<T: FromParam>(bytes: &[u8]) -> Result<BoxedValue, String> {
    let text = std::str::from_utf8(bytes).map_err(|e| e.to_string())?;
    parse_value::<T>(text).ok_or_else(|| format!("expected {}", T::TYPE_NAME))
}

fn decode_text_some<T: FromParam>(bytes: &[u8]) -> Result<BoxedValue, String> {
    let text = std::str::from_utf8(bytes).map_err(|e| e.to_string())?;
    parse_some::<T>(text).ok_or_else(|| format!("expected {}", T::TYPE_NAME))
}

fn decode_bytes(bytes: &[u8]) -> Result<BoxedValue, String> {
    Ok(Box::new(Bytes::copy_from_slice(bytes)))
}

fn decode_bytes_some(bytes: &[u8]) -> Result<BoxedValue, String> {
    Ok(Box::new(Some(Bytes::copy_from_slice(bytes))))
}

fn decode_json<T: DeserializeOwned + Send + 'static>(bytes: &[u8]) -> Result<BoxedValue, String> {
    serde_json::from_slice::<T>(bytes)
        .map(|v| Box::new(Json(v)) as BoxedValue)
        .map_err(|e| e.to_string())
}

fn decode_json_some<T: DeserializeOwned + Send + 'static>(
    bytes: &[u8],
) -> Result<BoxedValue, String> {
    serde_json::from_slice::<T>(bytes)
        .map(|v| Box::new(Some(Json(v))) as BoxedValue)
        .map_err(|e| e.to_string())
}

fn decode_json_value(bytes: &[u8]) -> Result<BoxedValue, String> {
    serde_json::from_slice::<serde_json::Value>(bytes)
        .map(|v| Box::new(v) as BoxedValue)
        .map_err(|e| e.to_string())
}

fn extract_cloned<T: Clone + Send + Sync + 'static>(ext: &Extensions) -> Option<BoxedValue> {
    ext.get::<T>()
        .map(|v| Box::new(Injected(v.clone())) as BoxedValue)
}

fn extract_cloned_some<T: Clone + Send + Sync + 'static>(ext: &Extensions) -> Option<BoxedValue> {
    Some(Box::new(ext.get::<T>().map(|v| Injected(v.clone()))))
}

impl ParameterType {
    /// A required value parsed from a string.
    pub fn scalar<T: FromParam>() -> Self {
        Self {
            type_name: T::TYPE_NAME,
            type_id: TypeId::of::<T>(),
            value_type: T::VALUE_TYPE,
            optional: false,
            parse: Some(parse_value::<T>),
            decode: Some(decode_text::<T>),
            absent: no_value,
            extract: None,
        }
    }

    /// `Option<T>` of a string-parsed value.
    pub fn optional<T: FromParam>() -> Self {
        Self {
            type_id: TypeId::of::<Option<T>>(),
            optional: true,
            parse: Some(parse_some::<T>),
            decode: Some(decode_text_some::<T>),
            absent: none_of::<T>,
            ..Self::scalar::<T>()
        }
    }

    /// A required value that no string converts to. Factories that know the
    /// concrete type build it themselves.
    pub fn opaque<T: Send + 'static>(type_name: &'static str) -> Self {
        Self {
            type_name,
            type_id: TypeId::of::<T>(),
            value_type: ValueType::Opaque,
            optional: false,
            parse: None,
            decode: None,
            absent: no_value,
            extract: None,
        }
    }

    /// `Option<T>` of an opaque value.
    pub fn optional_opaque<T: Send + 'static>(type_name: &'static str) -> Self {
        Self {
            type_id: TypeId::of::<Option<T>>(),
            optional: true,
            absent: none_of::<T>,
            ..Self::opaque::<T>(type_name)
        }
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn value_type(&self) -> ValueType {
        self.value_type
    }

    /// `true` for `Option<_>` arguments: absence is a value, not an error.
    pub fn is_optional(&self) -> bool {
        self.optional
    }

    /// `true` if the argument's exact Rust type is `T`.
    pub fn is<T: 'static>(&self) -> bool {
        self.type_id == TypeId::of::<T>()
    }

    pub fn supports_text(&self) -> bool {
        self.parse.is_some()
    }

    pub fn supports_body(&self) -> bool {
        self.decode.is_some()
    }

    pub fn supports_injection(&self) -> bool {
        self.extract.is_some()
    }

    /// Converts one request string; `None` when it does not convert.
    pub fn parse(&self, raw: &str) -> Option<BoxedValue> {
        self.parse.and_then(|parse| parse(raw))
    }

    /// Converts a request body; `Err` carries the decoder's reason.
    pub fn decode(&self, bytes: &[u8]) -> Result<BoxedValue, String> {
        match self.decode {
            Some(decode) => decode(bytes),
            None => Err(format!("{} cannot be read from a body", self.type_name)),
        }
    }

    /// The value standing in for a missing request value: `Some(None)` for
    /// optional arguments, `None` for required ones.
    pub fn absent(&self) -> Option<BoxedValue> {
        (self.absent)()
    }

    /// Pulls an injected object out of the extensions.
    pub fn extract(&self, extensions: &Extensions) -> Option<BoxedValue> {
        self.extract.and_then(|extract| extract(extensions))
    }
}

impl fmt::Debug for ParameterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParameterType")
            .field("type_name", &self.type_name)
            .field("value_type", &self.value_type)
            .field("optional", &self.optional)
            .finish()
    }
}

/// A type usable as a handler argument.
pub trait Parameter: Send + 'static {
    fn parameter_type() -> ParameterType;
}

impl<T: FromParam> Parameter for T {
    fn parameter_type() -> ParameterType {
        ParameterType::scalar::<T>()
    }
}

impl<T: FromParam> Parameter for Option<T> {
    fn parameter_type() -> ParameterType {
        ParameterType::optional::<T>()
    }
}

impl Parameter for Bytes {
    fn parameter_type() -> ParameterType {
        ParameterType {
            decode: Some(decode_bytes),
            ..ParameterType::opaque::<Bytes>("bytes")
        }
    }
}

impl Parameter for Option<Bytes> {
    fn parameter_type() -> ParameterType {
        ParameterType {
            decode: Some(decode_bytes_some),
            ..ParameterType::optional_opaque::<Bytes>("bytes")
        }
    }
}

impl<T: DeserializeOwned + Send + 'static> Parameter for Json<T> {
    fn parameter_type() -> ParameterType {
        ParameterType {
            value_type: ValueType::Json,
            decode: Some(decode_json::<T>),
            ..ParameterType::opaque::<Json<T>>("JSON")
        }
    }
}

impl<T: DeserializeOwned + Send + 'static> Parameter for Option<Json<T>> {
    fn parameter_type() -> ParameterType {
        ParameterType {
            value_type: ValueType::Json,
            decode: Some(decode_json_some::<T>),
            ..ParameterType::optional_opaque::<Json<T>>("JSON")
        }
    }
}

impl Parameter for serde_json::Value {
    fn parameter_type() -> ParameterType {
        ParameterType {
            value_type: ValueType::Json,
            decode: Some(decode_json_value),
            ..ParameterType::opaque::<serde_json::Value>("JSON")
        }
    }
}

impl<T: Clone + Send + Sync + 'static> Parameter for Injected<T> {
    fn parameter_type() -> ParameterType {
        ParameterType {
            extract: Some(extract_cloned::<T>),
            ..ParameterType::opaque::<Injected<T>>(std::any::type_name::<T>())
        }
    }
}

impl<T: Clone + Send + Sync + 'static> Parameter for Option<Injected<T>> {
    fn parameter_type() -> ParameterType {
        ParameterType {
            extract: Some(extract_cloned_some::<T>),
            ..ParameterType::optional_opaque::<Injected<T>>(std::any::type_name::<T>())
        }
    }
}

impl Parameter for Principal {
    fn parameter_type() -> ParameterType {
        ParameterType::opaque::<Principal>("Principal")
    }
}

impl Parameter for Option<Principal> {
    fn parameter_type() -> ParameterType {
        ParameterType::optional_opaque::<Principal>("Principal")
    }
}

impl Parameter for ClientCertificate {
    fn parameter_type() -> ParameterType {
        ParameterType::opaque::<ClientCertificate>("ClientCertificate")
    }
}

impl Parameter for Option<ClientCertificate> {
    fn parameter_type() -> ParameterType {
        ParameterType::optional_opaque::<ClientCertificate>("ClientCertificate")
    }
}

/// What a return factory may know about a handler's return value.
#[derive(Clone)]
pub struct ReturnType {
    type_name: &'static str,
    void: bool,
    text: Option<TextFn>,
    json: Option<JsonFn>,
}

fn text_of<T: ToString + 'static>(value: &dyn Any) -> Option<String> {
    value.downcast_ref::<T>().map(ToString::to_string)
}

fn json_of<T: Serialize + 'static>(value: &dyn Any) -> Option<serde_json::Result<Vec<u8>>> {
    value.downcast_ref::<T>().map(serde_json::to_vec)
}

fn json_wrapped<T: Serialize + 'static>(value: &dyn Any) -> Option<serde_json::Result<Vec<u8>>> {
    value
        .downcast_ref::<Json<T>>()
        .map(|json| serde_json::to_vec(&json.0))
}

impl ReturnType {
    /// Nothing to write.
    pub fn void() -> Self {
        Self {
            type_name: "()",
            void: true,
            text: None,
            json: None,
        }
    }

    /// Writable as text and as JSON.
    pub fn plain<T: ToString + Serialize + 'static>(type_name: &'static str) -> Self {
        Self {
            type_name,
            void: false,
            text: Some(text_of::<T>),
            json: Some(json_of::<T>),
        }
    }

    /// Writable as text only.
    pub fn text<T: ToString + 'static>(type_name: &'static str) -> Self {
        Self {
            type_name,
            void: false,
            text: Some(text_of::<T>),
            json: None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn is_void(&self) -> bool {
        self.void
    }

    pub fn supports_text(&self) -> bool {
        self.text.is_some()
    }

    pub fn supports_json(&self) -> bool {
        self.json.is_some()
    }

    /// Renders the value as text; `None` if unsupported or of another type.
    pub fn to_text(&self, value: &dyn Any) -> Option<String> {
        self.text.and_then(|text| text(value))
    }

    /// Serializes the value as JSON; `None` if unsupported or of another type.
    pub fn to_json(&self, value: &dyn Any) -> Option<serde_json::Result<Vec<u8>>> {
        self.json.and_then(|json| json(value))
    }
}

impl fmt::Debug for ReturnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReturnType")
            .field("type_name", &self.type_name)
            .field("void", &self.void)
            .finish()
    }
}

/// A type usable as a handler's success value.
pub trait Reply: Send + 'static {
    fn return_type() -> ReturnType;
}

impl Reply for () {
    fn return_type() -> ReturnType {
        ReturnType::void()
    }
}

impl Reply for String {
    fn return_type() -> ReturnType {
        ReturnType::plain::<String>("String")
    }
}

impl Reply for &'static str {
    fn return_type() -> ReturnType {
        ReturnType::plain::<&'static str>("str")
    }
}

impl Reply for bool {
    fn return_type() -> ReturnType {
        ReturnType::plain::<bool>("boolean")
    }
}

impl Reply for i32 {
    fn return_type() -> ReturnType {
        ReturnType::plain::<i32>("int")
    }
}

impl Reply for i64 {
    fn return_type() -> ReturnType {
        ReturnType::plain::<i64>("long")
    }
}

impl Reply for Uuid {
    fn return_type() -> ReturnType {
        ReturnType::plain::<Uuid>("UUID")
    }
}

impl Reply for Url {
    fn return_type() -> ReturnType {
        ReturnType::text::<Url>("URL")
    }
}

impl Reply for serde_json::Value {
    fn return_type() -> ReturnType {
        ReturnType::plain::<serde_json::Value>("JSON")
    }
}

impl<T: Serialize + Send + 'static> Reply for Json<T> {
    fn return_type() -> ReturnType {
        ReturnType {
            type_name: "JSON",
            void: false,
            text: None,
            json: Some(json_wrapped::<T>),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    enum Color {
        Red,
        Green,
    }
    crate::enum_parameter!(Color { Red, Green });

    fn take<T: 'static>(value: BoxedValue) -> T {
        *value.downcast::<T>().unwrap()
    }

    #[test]
    fn scalars_parse() {
        let ty = <i64 as Parameter>::parameter_type();
        assert_eq!(ty.value_type(), ValueType::Long);
        assert!(!ty.is_optional());
        assert_eq!(take::<i64>(ty.parse("42").unwrap()), 42);
        assert!(ty.parse("forty-two").is_none());
        assert!(ty.absent().is_none());
    }

    #[test]
    fn optional_wraps_and_has_absent_value() {
        let ty = <Option<bool> as Parameter>::parameter_type();
        assert!(ty.is_optional());
        assert!(ty.is::<Option<bool>>());
        assert_eq!(take::<Option<bool>>(ty.parse("TRUE").unwrap()), Some(true));
        assert_eq!(take::<Option<bool>>(ty.absent().unwrap()), None);
    }

    #[test]
    fn uuid_and_url() {
        let id = Uuid::new_v4();
        let ty = <Uuid as Parameter>::parameter_type();
        assert_eq!(take::<Uuid>(ty.parse(&id.to_string()).unwrap()), id);
        assert_eq!(ty.type_name(), "UUID");

        let ty = <Url as Parameter>::parameter_type();
        let url = take::<Url>(ty.parse("https://example.com/a").unwrap());
        assert_eq!(url.host_str(), Some("example.com"));
        assert!(ty.parse("not a url").is_none());
    }

    #[test]
    fn enums_by_name() {
        let ty = <Color as Parameter>::parameter_type();
        assert_eq!(ty.value_type(), ValueType::Enum);
        assert_eq!(ty.type_name(), "Color");
        assert_eq!(take::<Color>(ty.parse("Green").unwrap()), Color::Green);
        assert!(ty.parse("Blue").is_none());
        let _ = Color::Red;
    }

    #[test]
    fn opaque_types_do_not_parse_text() {
        let ty = <Bytes as Parameter>::parameter_type();
        assert!(!ty.supports_text());
        assert!(ty.supports_body());
        assert_eq!(take::<Bytes>(ty.decode(b"raw").unwrap()).as_ref(), b"raw");
    }

    #[test]
    fn json_bodies_decode() {
        #[derive(serde::Deserialize)]
        struct Point {
            x: i32,
        }
        let ty = <Json<Point> as Parameter>::parameter_type();
        let Json(point) = take::<Json<Point>>(ty.decode(br#"{"x":3}"#).unwrap());
        assert_eq!(point.x, 3);
        assert!(ty.decode(b"{").is_err());
    }

    #[test]
    fn injected_values_are_cloned_from_extensions() {
        let mut ext = Extensions::new();
        ext.insert(String::from("tenant-a"));
        let ty = <Injected<String> as Parameter>::parameter_type();
        assert!(ty.supports_injection());
        assert_eq!(take::<Injected<String>>(ty.extract(&ext).unwrap()).0, "tenant-a");

        let ty = <Option<Injected<u8>> as Parameter>::parameter_type();
        assert_eq!(take::<Option<Injected<u8>>>(ty.extract(&ext).unwrap()), None);
    }

    #[test]
    fn return_types() {
        let ty = <String as Reply>::return_type();
        assert!(!ty.is_void());
        let value = String::from("hi");
        assert_eq!(ty.to_text(&value).as_deref(), Some("hi"));
        assert_eq!(ty.to_json(&value).unwrap().unwrap(), br#""hi""#.to_vec());

        let ty = <Json<Vec<i32>> as Reply>::return_type();
        assert!(!ty.supports_text());
        let value = Json(vec![1, 2]);
        assert_eq!(ty.to_json(&value).unwrap().unwrap(), b"[1,2]".to_vec());

        assert!(<() as Reply>::return_type().is_void());
        assert!(<Url as Reply>::return_type().supports_text());
        assert!(!<Url as Reply>::return_type().supports_json());
    }
}
