//! Derive macro for scoped-dic
//!
//! `#[derive(Accessors)]` turns a struct listing the objects of a container
//! into a typed accessor facade:
//!
//! - one [`Key`] constant per field (`AppObjects::DB`)
//! - an extension trait implemented for `Container` with
//!   `safe_get_x`, `get_x`, `unscoped_safe_get_x` and `unscoped_get_x`
//! - an associated function `x(&carrier)` resolving the active container
//!   from any `ActiveContainer`
//! - `from_container(&container)` filling every field at once
//!
//! # Example
//!
//! ```rust,ignore
//! use scoped_dic::{Accessors, Container};
//! use std::sync::Arc;
//!
//! struct Database;
//! struct User;
//!
//! #[derive(Accessors)]
//! #[accessors(trait_name = "Dic")]
//! struct AppObjects {
//!     #[accessor(name = "db")]
//!     db: Arc<Database>,
//!     // Object name defaults to the field name with `_` replaced by `-`
//!     req_user: Arc<User>,
//! }
//!
//! fn handler(request: &Container) {
//!     use Dic as _;
//!
//!     let db: Arc<Database> = request.get_db();
//!     let user = request.safe_get_req_user().unwrap();
//!     let same_user = AppObjects::req_user(request);
//!     let key = AppObjects::REQ_USER;
//! }
//! ```
//!
//! [`Key`]: https://docs.rs/scoped-dic/latest/scoped_dic/struct.Key.html

use proc_macro::TokenStream;
use proc_macro2::Span;
use quote::{format_ident, quote};
use syn::{Attribute, Data, DeriveInput, Fields, Ident, LitStr, Type, parse_macro_input};

/// Derive macro for the per-object accessor facade.
///
/// # Attributes
///
/// - `#[accessor(name = "...")]` on a field - Object name in the container.
///   Defaults to the field name with underscores replaced by dashes.
/// - `#[accessors(trait_name = "...")]` on the struct - Name of the generated
///   extension trait. Defaults to `{Struct}Accessors`.
///
/// Every field must have type `Arc<T>`, where `T` is the type built by the
/// definition of the object.
#[proc_macro_derive(Accessors, attributes(accessor, accessors))]
pub fn derive_accessors(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    expand(&input)
        .unwrap_or_else(syn::Error::into_compile_error)
        .into()
}

/// One object of the facade
struct Accessor<'a> {
    field: &'a Ident,
    object: String,
    ty: &'a Type,
}

fn expand(input: &DeriveInput) -> syn::Result<proc_macro2::TokenStream> {
    let name = &input.ident;
    let vis = &input.vis;

    if !input.generics.params.is_empty() {
        return Err(syn::Error::new_spanned(
            &input.generics,
            "Accessors cannot be derived for generic structs",
        ));
    }

    // Only support structs with named fields
    let fields = match &input.data {
        Data::Struct(data) => match &data.fields {
            Fields::Named(fields) => &fields.named,
            _ => {
                return Err(syn::Error::new_spanned(
                    input,
                    "Accessors can only be derived for structs with named fields",
                ));
            }
        },
        _ => {
            return Err(syn::Error::new_spanned(
                input,
                "Accessors can only be derived for structs",
            ));
        }
    };

    let trait_name = match struct_trait_name(&input.attrs)? {
        Some(lit) => Ident::new(&lit.value(), lit.span()),
        None => format_ident!("{}Accessors", name),
    };

    let mut accessors = Vec::with_capacity(fields.len());
    for field in fields {
        let Some(ident) = field.ident.as_ref() else {
            continue;
        };
        let ty = extract_arc_inner_type(&field.ty).ok_or_else(|| {
            syn::Error::new_spanned(&field.ty, "Accessor fields must have type Arc<T>")
        })?;
        let object = match field_object_name(&field.attrs)? {
            Some(lit) => lit.value(),
            None => ident.to_string().trim_start_matches("r#").replace('_', "-"),
        };
        if object.is_empty() {
            return Err(syn::Error::new_spanned(field, "Object name cannot be empty"));
        }
        accessors.push(Accessor {
            field: ident,
            object,
            ty,
        });
    }

    let consts = accessors.iter().map(|a| {
        let key = key_ident(a.field);
        let (object, ty) = (&a.object, a.ty);
        let doc = format!("Key of the `{object}` object");
        quote! {
            #[doc = #doc]
            pub const #key: ::scoped_dic::Key<#ty> = ::scoped_dic::Key::new(#object);
        }
    });

    let resolvers = accessors.iter().map(|a| {
        let (field, key, ty) = (a.field, key_ident(a.field), a.ty);
        let doc = format!(
            "Retrieve `{}` from the container carried by `carrier`, aborting on error.",
            a.object
        );
        quote! {
            #[doc = #doc]
            #[track_caller]
            pub fn #field<C>(carrier: &C) -> ::std::sync::Arc<#ty>
            where
                C: ::scoped_dic::ActiveContainer + ?Sized,
            {
                Self::#key.from_context(carrier)
            }
        }
    });

    let fills = accessors.iter().map(|a| {
        let (field, key) = (a.field, key_ident(a.field));
        quote! { #field: Self::#key.safe_get(container)? }
    });

    let signatures = accessors.iter().map(|a| {
        let methods = Methods::new(a.field);
        let Methods {
            safe_get,
            get,
            unscoped_safe_get,
            unscoped_get,
        } = &methods;
        let (object, ty) = (&a.object, a.ty);
        let safe_doc = format!("Retrieve `{object}`.");
        let unscoped_doc = format!("Retrieve `{object}` even from a wider scope.");
        quote! {
            #[doc = #safe_doc]
            fn #safe_get(&self) -> ::scoped_dic::Result<::std::sync::Arc<#ty>>;
            #[doc = #safe_doc]
            #[doc = ""]
            #[doc = "Aborts on error."]
            fn #get(&self) -> ::std::sync::Arc<#ty>;
            #[doc = #unscoped_doc]
            fn #unscoped_safe_get(&self) -> ::scoped_dic::Result<::std::sync::Arc<#ty>>;
            #[doc = #unscoped_doc]
            #[doc = ""]
            #[doc = "Aborts on error."]
            fn #unscoped_get(&self) -> ::std::sync::Arc<#ty>;
        }
    });

    let impls = accessors.iter().map(|a| {
        let key = key_ident(a.field);
        let Methods {
            safe_get,
            get,
            unscoped_safe_get,
            unscoped_get,
        } = Methods::new(a.field);
        let ty = a.ty;
        quote! {
            #[inline]
            fn #safe_get(&self) -> ::scoped_dic::Result<::std::sync::Arc<#ty>> {
                #name::#key.safe_get(self)
            }
            #[inline]
            #[track_caller]
            fn #get(&self) -> ::std::sync::Arc<#ty> {
                #name::#key.get(self)
            }
            #[inline]
            fn #unscoped_safe_get(&self) -> ::scoped_dic::Result<::std::sync::Arc<#ty>> {
                #name::#key.unscoped_safe_get(self)
            }
            #[inline]
            #[track_caller]
            fn #unscoped_get(&self) -> ::std::sync::Arc<#ty> {
                #name::#key.unscoped_get(self)
            }
        }
    });

    let trait_doc = format!("Typed accessors for the objects listed in [`{name}`].");

    Ok(quote! {
        impl #name {
            #(#consts)*

            #(#resolvers)*

            /// Retrieve every object listed in this struct.
            pub fn from_container(
                container: &::scoped_dic::Container,
            ) -> ::scoped_dic::Result<Self> {
                Ok(Self {
                    #(#fills),*
                })
            }
        }

        #[doc = #trait_doc]
        #vis trait #trait_name {
            #(#signatures)*
        }

        impl #trait_name for ::scoped_dic::Container {
            #(#impls)*
        }
    })
}

/// Method names generated for one object
struct Methods {
    safe_get: Ident,
    get: Ident,
    unscoped_safe_get: Ident,
    unscoped_get: Ident,
}

impl Methods {
    fn new(field: &Ident) -> Self {
        let field = field.to_string();
        let field = field.trim_start_matches("r#");
        Self {
            safe_get: format_ident!("safe_get_{}", field),
            get: format_ident!("get_{}", field),
            unscoped_safe_get: format_ident!("unscoped_safe_get_{}", field),
            unscoped_get: format_ident!("unscoped_get_{}", field),
        }
    }
}

fn key_ident(field: &Ident) -> Ident {
    let upper = field.to_string().trim_start_matches("r#").to_uppercase();
    Ident::new(&upper, Span::call_site())
}

/// Parse `#[accessor(name = "...")]`
fn field_object_name(attrs: &[Attribute]) -> syn::Result<Option<LitStr>> {
    let mut name = None;
    for attr in attrs.iter().filter(|a| a.path().is_ident("accessor")) {
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("name") {
                name = Some(meta.value()?.parse::<LitStr>()?);
                Ok(())
            } else {
                Err(meta.error("unsupported accessor attribute, expected `name`"))
            }
        })?;
    }
    Ok(name)
}

/// Parse `#[accessors(trait_name = "...")]`
fn struct_trait_name(attrs: &[Attribute]) -> syn::Result<Option<LitStr>> {
    let mut name = None;
    for attr in attrs.iter().filter(|a| a.path().is_ident("accessors")) {
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("trait_name") {
                name = Some(meta.value()?.parse::<LitStr>()?);
                Ok(())
            } else {
                Err(meta.error("unsupported accessors attribute, expected `trait_name`"))
            }
        })?;
    }
    Ok(name)
}

/// Extract T from Arc<T>
fn extract_arc_inner_type(ty: &Type) -> Option<&Type> {
    if let Type::Path(type_path) = ty {
        let segment = type_path.path.segments.last()?;
        if segment.ident == "Arc" {
            if let syn::PathArguments::AngleBracketed(args) = &segment.arguments {
                if let Some(syn::GenericArgument::Type(inner)) = args.args.first() {
                    return Some(inner);
                }
            }
        }
    }
    None
}
