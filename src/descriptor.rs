//! Immutable lookup from `(service_id, method_id)` to method descriptor.
//!
//! Loading these descriptors from a compiled schema (protobuf FileDescriptor,
//! or anything else) is explicitly out of scope for this core; this module
//! only holds descriptors once they exist and answers lookups against them.

use std::collections::HashMap;

use crate::id::PathRef;
use crate::status::Error;
#[cfg(test)]
use crate::status::Status;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodType {
    Unary,
    ServerStreaming,
    ClientStreaming,
    BidirectionalStreaming,
}

impl MethodType {
    pub fn has_server_stream(&self) -> bool {
        matches!(
            self,
            MethodType::ServerStreaming | MethodType::BidirectionalStreaming
        )
    }

    pub fn has_client_stream(&self) -> bool {
        matches!(
            self,
            MethodType::ClientStreaming | MethodType::BidirectionalStreaming
        )
    }
}

/// Validates a payload against whatever concrete message schema the
/// embedder's method actually uses. The core never parses a payload itself —
/// it only ever asks a `Schema` whether a byte string is well-formed for a
/// method's request or response type.
pub trait Schema: std::fmt::Debug + Send + Sync {
    fn validate(&self, bytes: &[u8]) -> Result<(), Error>;
}

/// A `Schema` that accepts any byte string. Useful for tests, and for
/// embedders that don't need payload validation at this layer because a
/// higher layer (the per-call user API, out of scope here) already decodes
/// the payload into a concrete type and will surface a decode failure of its
/// own.
#[derive(Debug, Default, Clone, Copy)]
pub struct OpaqueSchema;

impl Schema for OpaqueSchema {
    fn validate(&self, _bytes: &[u8]) -> Result<(), Error> {
        Ok(())
    }
}

#[derive(Debug)]
pub struct Method {
    name: String,
    id: u32,
    ty: MethodType,
    request_schema: Box<dyn Schema>,
    response_schema: Box<dyn Schema>,
}

impl Method {
    pub fn new(
        name: impl Into<String>,
        id: u32,
        ty: MethodType,
        request_schema: impl Schema + 'static,
        response_schema: impl Schema + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            id,
            ty,
            request_schema: Box::new(request_schema),
            response_schema: Box::new(response_schema),
        }
    }

    /// A method descriptor with an [`OpaqueSchema`] on both sides — handy
    /// when the embedder's schema validation happens elsewhere.
    pub fn opaque(name: impl Into<String>, id: u32, ty: MethodType) -> Self {
        Self::new(name, id, ty, OpaqueSchema, OpaqueSchema)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn ty(&self) -> MethodType {
        self.ty
    }

    pub fn request_schema(&self) -> &dyn Schema {
        self.request_schema.as_ref()
    }

    pub fn response_schema(&self) -> &dyn Schema {
        self.response_schema.as_ref()
    }
}

#[derive(Debug)]
pub struct Service {
    name: String,
    id: u32,
    methods: HashMap<u32, Method>,
}

impl Service {
    pub fn new(name: impl Into<String>, id: u32, methods: impl IntoIterator<Item = Method>) -> Self {
        Self {
            name: name.into(),
            id,
            methods: methods.into_iter().map(|m| (m.id(), m)).collect(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn method(&self, method_id: u32) -> Option<&Method> {
        self.methods.get(&method_id)
    }

    pub fn methods(&self) -> impl Iterator<Item = &Method> {
        self.methods.values()
    }
}

/// Immutable registry of services, indexed by `service_id`.
#[derive(Debug)]
pub struct Services {
    by_id: HashMap<u32, Service>,
}

impl Services {
    pub fn new(services: impl IntoIterator<Item = Service>) -> Self {
        Self {
            by_id: services.into_iter().map(|s| (s.id(), s)).collect(),
        }
    }

    pub fn service(&self, service_id: u32) -> Option<&Service> {
        self.by_id.get(&service_id)
    }

    pub fn lookup(&self, service_id: u32, method_id: u32) -> Result<&Method, Error> {
        let service = self
            .by_id
            .get(&service_id)
            .ok_or_else(|| Error::not_found(format!("unrecognized service id {service_id:#010x}")))?;

        service.method(method_id).ok_or_else(|| {
            Error::not_found(format!(
                "no method id {method_id:#010x} in service {}",
                service.name
            ))
        })
    }

    pub fn services(&self) -> impl Iterator<Item = &Service> {
        self.by_id.values()
    }

    pub fn methods(&self) -> impl Iterator<Item = &Method> {
        self.by_id.values().flat_map(|s| s.methods())
    }

    /// Resolves `package.Service/Method` or `package.Service.Method` to a
    /// `(service, method)` pair. Any other form is `Status::InvalidArgument`;
    /// an unrecognized service or method is `Status::NotFound`.
    ///
    /// Like a real peer, this never walks service/method names directly: the
    /// path's two components are hashed to ids the same way a peer computes
    /// them from its own copy of the name, then resolved through the same
    /// id-keyed `lookup` the dispatcher uses for inbound packets.
    pub fn get_method(&self, method_name: &str) -> Result<(&Service, &Method), Error> {
        if !method_name.contains('/') && !method_name.contains('.') {
            return Err(Error::invalid_argument(format!(
                "'{method_name}' is not a properly formatted method name; \
                 expected package.Service/Method or package.Service.Method"
            )));
        }

        let path = PathRef::new(method_name);
        let service_id = path.service().hash();
        let method_id = path.method().hash();

        let method = self.lookup(service_id, method_id)?;
        let service = self
            .service(service_id)
            .expect("lookup succeeded, so its service_id is registered");

        Ok((service, method))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn services() -> Services {
        Services::new([Service::new(
            "maestro_pw.Maestro",
            0x7ede71ea,
            [Method::opaque("GetSoftwareInfo", 0x7199fa44, MethodType::Unary)],
        )])
    }

    #[test]
    fn lookup_by_id_succeeds() {
        let services = services();
        let method = services.lookup(0x7ede71ea, 0x7199fa44).unwrap();
        assert_eq!(method.name(), "GetSoftwareInfo");
    }

    #[test]
    fn lookup_unknown_service_is_not_found() {
        let services = services();
        let err = services.lookup(0xDEAD, 0x7199fa44).unwrap_err();
        assert_eq!(err.code(), Status::NotFound);
    }

    #[test]
    fn lookup_unknown_method_is_not_found() {
        let services = services();
        let err = services.lookup(0x7ede71ea, 0xDEAD).unwrap_err();
        assert_eq!(err.code(), Status::NotFound);
    }

    #[test]
    fn get_method_accepts_both_syntaxes() {
        let services = services();

        let (service, method) = services
            .get_method("maestro_pw.Maestro/GetSoftwareInfo")
            .unwrap();
        assert_eq!(service.name(), "maestro_pw.Maestro");
        assert_eq!(method.name(), "GetSoftwareInfo");

        let (service, method) = services
            .get_method("maestro_pw.Maestro.GetSoftwareInfo")
            .unwrap();
        assert_eq!(service.name(), "maestro_pw.Maestro");
        assert_eq!(method.name(), "GetSoftwareInfo");
    }

    #[test]
    fn get_method_rejects_malformed_names() {
        let services = services();
        let err = services.get_method("not-a-path").unwrap_err();
        assert_eq!(err.code(), Status::InvalidArgument);
    }

    #[test]
    fn get_method_reports_not_found_for_unknown_method() {
        let services = services();
        let err = services
            .get_method("maestro_pw.Maestro/NoSuchMethod")
            .unwrap_err();
        assert_eq!(err.code(), Status::NotFound);
    }
}
