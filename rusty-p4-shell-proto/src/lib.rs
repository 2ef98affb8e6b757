//! P4Runtime v1 messages (`p4.v1`, `p4.config.v1`) and the `google.rpc` status
//! types they carry, declared as `prost` messages, plus a `tonic` client for the
//! `p4.v1.P4Runtime` service.
//!
//! Only the parts of the protocol a table/counter client touches are declared;
//! unknown fields sent by a device are skipped by the decoder.

pub mod proto {
    pub mod v1 {
        include!("p4.v1.rs");
    }

    pub mod config {
        pub mod v1 {
            include!("p4.config.v1.rs");
        }
    }
}

pub mod google {
    pub mod rpc {
        include!("google.rpc.rs");
    }

    pub mod protobuf {
        /// `google.protobuf.Any`.
        #[derive(Clone, PartialEq, ::prost::Message)]
        pub struct Any {
            #[prost(string, tag = "1")]
            pub type_url: ::prost::alloc::string::String,
            #[prost(bytes = "bytes", tag = "2")]
            pub value: ::prost::bytes::Bytes,
        }
    }
}
