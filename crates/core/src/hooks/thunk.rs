//! Native entry points for vtable hooks
//!
//! A patched slot needs a function with exactly the slot's signature.
//! [`vtable_thunk!`](crate::vtable_thunk) generates one per hooked symbol:
//! the thunk packs its arguments into a [`ParamBundle`](super::ParamBundle),
//! hands them to dispatch together with a way to call the original, and
//! unpacks whatever dispatch decides to return.

/// Generate an `extern "C"` thunk and a matching descriptor constructor
///
/// ```ignore
/// vtable_thunk! {
///     fn on_damaged_by_explosion("OnDamagedByExplosion")(info: *const c_void) -> i32;
/// }
///
/// let descriptor = on_damaged_by_explosion_descriptor()
///     .resolve(&offsets, "csgo", Platform::current())?
///     .callback(|_| Decision::Handled(Param::Int(0)));
/// ```
///
/// The thunk takes the object pointer as its first argument, followed by the
/// declared arguments. Every argument and the return type must implement
/// [`HookArg`](crate::hooks::HookArg). Omitting `-> $ret` declares a void
/// function.
#[macro_export]
macro_rules! vtable_thunk {
    (
        $(#[$meta:meta])*
        $vis:vis fn $name:ident($symbol:literal)($($arg:ident: $ty:ty),* $(,)?) -> $ret:ty;
    ) => {
        $(#[$meta])*
        #[allow(unused_mut, unused_variables)]
        $vis extern "C" fn $name(this: *mut ::std::ffi::c_void $(, $arg: $ty)*) -> $ret {
            let params = $crate::hooks::ParamBundle::new(::std::vec![
                $(<$ty as $crate::hooks::HookArg>::into_param($arg)),*
            ]);

            let call_original = |original: *const (),
                                 params: &$crate::hooks::ParamBundle|
             -> ::std::option::Option<$crate::hooks::Param> {
                let mut slots = params.iter().copied();
                $(let $arg = <$ty as $crate::hooks::HookArg>::from_param(slots.next()?)?;)*
                // SAFETY: `original` was read from the slot this thunk replaced,
                // so it has the same signature
                let original: extern "C" fn(*mut ::std::ffi::c_void $(, $ty)*) -> $ret =
                    unsafe { ::std::mem::transmute::<*const (), _>(original) };
                ::std::option::Option::Some(<$ret as $crate::hooks::HookArg>::into_param(
                    original(this $(, $arg)*),
                ))
            };

            let ret = $crate::hooks::dispatch::invoke(
                $symbol,
                this,
                params,
                &call_original,
                |value| <$ret as $crate::hooks::HookArg>::from_param(value).is_some(),
            );
            <$ret as $crate::hooks::HookArg>::from_param(ret)
                .unwrap_or_else(<$ret as $crate::hooks::HookArg>::fallback)
        }

        $crate::paste::paste! {
            #[allow(dead_code)]
            $vis fn [<$name _descriptor>]() -> $crate::hooks::HookDescriptor {
                $crate::hooks::HookDescriptor::new($symbol, $name as *const ())
                    .params(::std::vec![$(<$ty as $crate::hooks::HookArg>::TYPE),*])
                    .returns(<$ret as $crate::hooks::HookArg>::TYPE)
            }
        }
    };

    (
        $(#[$meta:meta])*
        $vis:vis fn $name:ident($symbol:literal)($($arg:ident: $ty:ty),* $(,)?);
    ) => {
        $crate::vtable_thunk! {
            $(#[$meta])*
            $vis fn $name($symbol)($($arg: $ty),*) -> ();
        }
    };
}
