// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

//! Contract traits and the macros that derive them.
//!
//! A service contract is an async trait whose methods return
//! `Result<T, Fault>`. A callback contract is a sync trait of one-way
//! notifications. [`service_contract!`](crate::service_contract) and
//! [`callback_contract!`](crate::callback_contract) declare the trait and
//! generate its descriptors, its server-side dispatch and a proxy
//! implementation on [`InstanceProxy`](crate::InstanceProxy).
//!
//! ```ignore
//! service_contract! {
//!     #[per_peer]
//!     pub trait Counter {
//!         async fn add(&self, delta: u64) -> u64;
//!         async fn reset(&self);
//!     }
//! }
//!
//! callback_contract! {
//!     pub trait CounterEvents {
//!         fn changed(&self, value: u64);
//!     }
//! }
//! ```

use std::sync::Arc;

use futures::future::BoxFuture;

use crate::descriptor::{MethodDescriptor, MethodDescriptorCollection};
use crate::errors::RuntimeError;
use crate::exception::Fault;
use crate::proxy::Invoker;
use crate::serializer::WireCodec;

pub trait Contract: Send + Sync + 'static {
    const NAME: &'static str;

    fn descriptors() -> &'static MethodDescriptorCollection;
}

pub trait ServiceContract: Contract {
    /// One implementation instance per connected peer instead of one
    /// shared instance.
    const PER_PEER: bool;

    fn dispatch<'a>(
        instance: &'a Arc<Self>,
        descriptor: &'a MethodDescriptor,
        args: &'a [String],
        codec: &'a WireCodec,
    ) -> BoxFuture<'a, Result<String, Fault>>;

    fn proxy(invoker: Arc<dyn Invoker>) -> Arc<Self>;
}

pub trait CallbackContract: Contract {
    fn dispatch(
        instance: &Arc<Self>,
        descriptor: &MethodDescriptor,
        args: &[String],
        codec: &WireCodec,
    ) -> Result<(), RuntimeError>;

    fn proxy(invoker: Arc<dyn Invoker>) -> Arc<Self>;
}

#[macro_export]
macro_rules! service_contract {
    (
        #[per_peer]
        $(#[$meta:meta])*
        $vis:vis trait $name:ident {
            $($body:tt)*
        }
    ) => {
        $crate::__service_contract! {
            true;
            $(#[$meta])*
            $vis trait $name { $($body)* }
        }
    };
    (
        $(#[$meta:meta])*
        $vis:vis trait $name:ident {
            $($body:tt)*
        }
    ) => {
        $crate::__service_contract! {
            false;
            $(#[$meta])*
            $vis trait $name { $($body)* }
        }
    };
}

#[doc(hidden)]
#[macro_export]
macro_rules! __service_contract {
    (
        $per_peer:literal;
        $(#[$meta:meta])*
        $vis:vis trait $name:ident {
            $(
                $(#[$mmeta:meta])*
                async fn $method:ident(&self $(, $arg:ident : $ty:ty)*) $(-> $ret:ty)?;
            )*
        }
    ) => {
        $(#[$meta])*
        #[$crate::async_trait::async_trait]
        $vis trait $name: Send + Sync {
            $(
                $(#[$mmeta])*
                async fn $method(&self $(, $arg: $ty)*)
                    -> ::std::result::Result<$crate::__contract_return!($($ret)?), $crate::Fault>;
            )*
        }

        impl $crate::Contract for dyn $name {
            const NAME: &'static str = stringify!($name);

            fn descriptors() -> &'static $crate::MethodDescriptorCollection {
                static DESCRIPTORS: ::std::sync::OnceLock<$crate::MethodDescriptorCollection> =
                    ::std::sync::OnceLock::new();
                DESCRIPTORS.get_or_init(|| {
                    $crate::MethodDescriptorCollection::new(
                        stringify!($name),
                        ::std::vec![$(
                            $crate::MethodDescriptor::new(
                                stringify!($name),
                                stringify!($method),
                                &[$(stringify!($ty)),*],
                                stringify!($($ret)?),
                                true,
                            ),
                        )*],
                    )
                })
            }
        }

        impl $crate::ServiceContract for dyn $name {
            const PER_PEER: bool = $per_peer;

            fn dispatch<'a>(
                instance: &'a ::std::sync::Arc<Self>,
                descriptor: &'a $crate::MethodDescriptor,
                args: &'a [::std::string::String],
                codec: &'a $crate::WireCodec,
            ) -> $crate::BoxFuture<'a, ::std::result::Result<::std::string::String, $crate::Fault>> {
                ::std::boxed::Box::pin(async move {
                    #[allow(unused_mut, unused_variables)]
                    let mut reader = $crate::ArgReader::new(descriptor, args, codec)?;
                    let outcome: ::std::result::Result<::std::string::String, $crate::Fault> =
                        match descriptor.name() {
                            $(
                                stringify!($method) => {
                                    $(let $arg: $ty = reader.read()?;)*
                                    let result = instance.$method($($arg),*).await?;
                                    ::std::result::Result::Ok(codec.encode(&result)?)
                                }
                            )*
                            _ => ::std::result::Result::Err(
                                $crate::RuntimeError::MethodNotFound(
                                    descriptor.generated_name().to_string(),
                                )
                                .into(),
                            ),
                        };
                    outcome
                })
            }

            fn proxy(invoker: ::std::sync::Arc<dyn $crate::Invoker>) -> ::std::sync::Arc<Self> {
                ::std::sync::Arc::new($crate::InstanceProxy::<dyn $name>::new(invoker))
            }
        }

        #[$crate::async_trait::async_trait]
        impl $name for $crate::InstanceProxy<dyn $name> {
            $(
                async fn $method(&self $(, $arg: $ty)*)
                    -> ::std::result::Result<$crate::__contract_return!($($ret)?), $crate::Fault>
                {
                    #[allow(unused_mut)]
                    let mut writer = self.writer();
                    $(writer.push(&$arg);)*
                    $crate::__contract_invoke!(self, stringify!($method), writer $(, $ret)?)
                }
            )*
        }
    };
}

#[doc(hidden)]
#[macro_export]
macro_rules! __contract_return {
    () => { () };
    ($ret:ty) => { $ret };
}

#[doc(hidden)]
#[macro_export]
macro_rules! __contract_invoke {
    ($proxy:ident, $method:expr, $writer:ident) => {
        $proxy.invoke_async_void($method, $writer).await
    };
    ($proxy:ident, $method:expr, $writer:ident, $ret:ty) => {
        $proxy.invoke_async::<$ret>($method, $writer).await
    };
}

#[macro_export]
macro_rules! callback_contract {
    (
        $(#[$meta:meta])*
        $vis:vis trait $name:ident {
            $(
                $(#[$mmeta:meta])*
                fn $method:ident(&self $(, $arg:ident : $ty:ty)*);
            )*
        }
    ) => {
        $(#[$meta])*
        $vis trait $name: Send + Sync {
            $(
                $(#[$mmeta])*
                fn $method(&self $(, $arg: $ty)*);
            )*
        }

        impl $crate::Contract for dyn $name {
            const NAME: &'static str = stringify!($name);

            fn descriptors() -> &'static $crate::MethodDescriptorCollection {
                static DESCRIPTORS: ::std::sync::OnceLock<$crate::MethodDescriptorCollection> =
                    ::std::sync::OnceLock::new();
                DESCRIPTORS.get_or_init(|| {
                    $crate::MethodDescriptorCollection::new(
                        stringify!($name),
                        ::std::vec![$(
                            $crate::MethodDescriptor::new(
                                stringify!($name),
                                stringify!($method),
                                &[$(stringify!($ty)),*],
                                "",
                                false,
                            ),
                        )*],
                    )
                })
            }
        }

        impl $crate::CallbackContract for dyn $name {
            #[allow(unused_variables)]
            fn dispatch(
                instance: &::std::sync::Arc<Self>,
                descriptor: &$crate::MethodDescriptor,
                args: &[::std::string::String],
                codec: &$crate::WireCodec,
            ) -> ::std::result::Result<(), $crate::RuntimeError> {
                #[allow(unused_mut)]
                let mut reader = $crate::ArgReader::new(descriptor, args, codec)?;
                match descriptor.name() {
                    $(
                        stringify!($method) => {
                            $(let $arg: $ty = reader.read()?;)*
                            instance.$method($($arg),*);
                            ::std::result::Result::Ok(())
                        }
                    )*
                    _ => ::std::result::Result::Err($crate::RuntimeError::MethodNotFound(
                        descriptor.generated_name().to_string(),
                    )),
                }
            }

            fn proxy(invoker: ::std::sync::Arc<dyn $crate::Invoker>) -> ::std::sync::Arc<Self> {
                ::std::sync::Arc::new($crate::InstanceProxy::<dyn $name>::new(invoker))
            }
        }

        impl $name for $crate::InstanceProxy<dyn $name> {
            $(
                fn $method(&self $(, $arg: $ty)*) {
                    #[allow(unused_mut)]
                    let mut writer = self.writer();
                    $(writer.push(&$arg);)*
                    self.invoke_void(stringify!($method), writer);
                }
            )*
        }
    };
}

callback_contract! {
    /// Callback contract for services that never call back.
    pub trait NoCallbacks {}
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use parking_lot::Mutex;
    use thiserror::Error;

    use crate::{
        CallbackContract, Contract, Fault, InstanceProxy, Invoker, MethodCall, RuntimeError,
        ServiceContract, WireCodec,
    };

    service_contract! {
        /// Arithmetic over the wire.
        pub trait Calculator {
            async fn add(&self, a: i64, b: i64) -> i64;
            async fn divide(&self, a: i64, b: i64) -> i64;
            async fn clear(&self);
        }
    }

    service_contract! {
        #[per_peer]
        pub trait Session {
            async fn whoami(&self) -> Option<String>;
        }
    }

    callback_contract! {
        pub trait Display {
            fn show(&self, value: i64, unit: String);
        }
    }

    #[derive(Error, Debug)]
    #[error("division by zero")]
    struct DivideByZero;

    struct Local;

    #[async_trait]
    impl Calculator for Local {
        async fn add(&self, a: i64, b: i64) -> Result<i64, Fault> {
            Ok(a + b)
        }

        async fn divide(&self, a: i64, b: i64) -> Result<i64, Fault> {
            if b == 0 {
                return Err(Fault::raise(DivideByZero));
            }
            Ok(a / b)
        }

        async fn clear(&self) -> Result<(), Fault> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct Recorder {
        shown: Mutex<Vec<(i64, String)>>,
    }

    impl Display for Recorder {
        fn show(&self, value: i64, unit: String) {
            self.shown.lock().push((value, unit));
        }
    }

    /// Dispatches straight into a local Calculator and records posts.
    struct Loopback {
        codec: WireCodec,
        target: Arc<dyn Calculator>,
        posted: Mutex<Vec<MethodCall>>,
    }

    #[async_trait]
    impl Invoker for Loopback {
        fn codec(&self) -> &WireCodec {
            &self.codec
        }

        fn post(&self, call: MethodCall) -> Result<(), RuntimeError> {
            self.posted.lock().push(call);
            Ok(())
        }

        async fn call(&self, call: MethodCall) -> Result<String, Fault> {
            let descriptor = <dyn Calculator>::descriptors()
                .get(&call.method)
                .ok_or_else(|| RuntimeError::MethodNotFound(call.method.clone()))?;
            <dyn Calculator as ServiceContract>::dispatch(
                &self.target,
                descriptor,
                &call.args,
                &self.codec,
            )
            .await
        }
    }

    fn loopback() -> Arc<Loopback> {
        Arc::new(Loopback {
            codec: WireCodec::default(),
            target: Arc::new(Local),
            posted: Mutex::new(Vec::new()),
        })
    }

    #[test]
    fn test_contract_metadata() {
        assert_eq!(<dyn Calculator>::NAME, "Calculator");
        assert!(!<dyn Calculator as ServiceContract>::PER_PEER);
        assert!(<dyn Session as ServiceContract>::PER_PEER);

        let names: Vec<&str> = <dyn Calculator>::descriptors()
            .iter()
            .map(|d| d.generated_name())
            .collect();
        assert_eq!(
            names,
            vec![
                "i64 Calculator.add(i64,i64)",
                "i64 Calculator.divide(i64,i64)",
                "() Calculator.clear()",
            ]
        );
        assert_eq!(
            <dyn Session>::descriptors()
                .by_name("whoami")
                .map(|d| d.return_type()),
            Some("Option<String>")
        );

        let show = <dyn Display>::descriptors().by_name("show").unwrap();
        assert_eq!(show.generated_name(), "() Display.show(i64,String)");
        assert!(!show.is_async());
    }

    #[tokio::test]
    async fn test_proxy_round_trip() {
        let proxy = <dyn Calculator as ServiceContract>::proxy(loopback());

        assert_eq!(proxy.add(2, 40).await.unwrap(), 42);
        proxy.clear().await.unwrap();

        let fault = proxy.divide(1, 0).await.unwrap_err();
        assert!(fault.downcast_ref::<DivideByZero>().is_some());
    }

    #[tokio::test]
    async fn test_dispatch_unknown_method() {
        let target: Arc<dyn Calculator> = Arc::new(Local);
        let codec = WireCodec::default();
        let foreign = crate::MethodDescriptor::new("Calculator", "sqrt", &["i64"], "i64", true);

        let res = <dyn Calculator as ServiceContract>::dispatch(
            &target,
            &foreign,
            &["4".to_string()],
            &codec,
        )
        .await;
        assert!(matches!(
            res,
            Err(Fault::Runtime(RuntimeError::MethodNotFound(_)))
        ));
    }

    #[test]
    fn test_callback_proxy_posts() {
        let invoker = loopback();
        let proxy = InstanceProxy::<dyn Display>::new(invoker.clone());

        proxy.show(3, "m".to_string());

        let posted = invoker.posted.lock().clone();
        assert_eq!(
            posted,
            vec![MethodCall {
                service: "Display".to_string(),
                method: "() Display.show(i64,String)".to_string(),
                args: vec!["3".to_string(), "\"m\"".to_string()],
            }]
        );
    }

    #[test]
    fn test_callback_dispatch() {
        let recorder = Arc::new(Recorder::default());
        let instance: Arc<dyn Display> = recorder.clone();
        let codec = WireCodec::default();
        let descriptor = <dyn Display>::descriptors().by_name("show").unwrap();

        <dyn Display as CallbackContract>::dispatch(
            &instance,
            descriptor,
            &["9".to_string(), "\"s\"".to_string()],
            &codec,
        )
        .unwrap();
        assert_eq!(recorder.shown.lock().clone(), vec![(9, "s".to_string())]);

        let res = <dyn Display as CallbackContract>::dispatch(
            &instance,
            descriptor,
            &["9".to_string()],
            &codec,
        );
        assert!(matches!(res, Err(RuntimeError::InvalidArguments { .. })));
    }
}
